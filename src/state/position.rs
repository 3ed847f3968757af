use crate::types::{Side, TENTHS_PER_CENT};

/// One open position. A trader holds at most one of these.
#[derive(Debug, Clone)]
pub struct Position {
    pub side: Side,
    pub size: u32,
    pub entry_price: u8,
    pub highest_seen_tenths: i64,
    pub stop_loss_tenths: i64,
    pub trailing_stop_tenths: i64,
    pub opened_at_ms: i64,
    pub entry_order_id: String,
}

impl Position {
    /// stop = entry - stop_loss - fee, trailing = entry - trailing_stop,
    /// clamped so the trailing stop never starts below the hard stop.
    pub fn open(
        side: Side,
        size: u32,
        entry_price: u8,
        opened_at_ms: i64,
        entry_order_id: String,
        stop_loss_cents: i64,
        trailing_stop_cents: i64,
        fee_cents: i64,
    ) -> Self {
        let entry_tenths = entry_price as i64 * TENTHS_PER_CENT;
        let stop_loss_tenths = entry_tenths - (stop_loss_cents + fee_cents) * TENTHS_PER_CENT;
        let trailing_stop_tenths =
            (entry_tenths - trailing_stop_cents * TENTHS_PER_CENT).max(stop_loss_tenths);
        Self {
            side,
            size,
            entry_price,
            highest_seen_tenths: entry_tenths,
            stop_loss_tenths,
            trailing_stop_tenths,
            opened_at_ms,
            entry_order_id,
        }
    }

    /// Ratchet the trailing stop with a fresh mid on the held side. The high
    /// water mark only moves up.
    pub fn ratchet(&mut self, mid_tenths: i64, trailing_stop_cents: i64) {
        if mid_tenths > self.highest_seen_tenths {
            self.highest_seen_tenths = mid_tenths;
            self.trailing_stop_tenths = (self.highest_seen_tenths
                - trailing_stop_cents * TENTHS_PER_CENT)
                .max(self.stop_loss_tenths);
        }
    }

    pub fn exposure_cents(&self) -> i64 {
        self.size as i64 * self.entry_price as i64
    }
}
