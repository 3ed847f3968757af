use crate::types::{valid_price, Sample, Side};

/// Best-of-book projection for one market.
///
/// Only bid ladders are kept; in a binary market the ask on one contract is
/// implied by the best bid on the other (yes_ask = 100 - best_no_bid).
#[derive(Debug, Clone)]
pub struct Book {
    // Each index is a price in cents (0..=100), value is quantity resting.
    yes_bids: [i64; 101],
    no_bids: [i64; 101],
    last_ts_ms: i64,
}

impl Default for Book {
    fn default() -> Self {
        Self {
            yes_bids: [0; 101],
            no_bids: [0; 101],
            last_ts_ms: -1,
        }
    }
}

impl Book {
    pub fn reset(&mut self, ts_ms: i64, yes: &[(u8, i64)], no: &[(u8, i64)]) {
        self.yes_bids = [0; 101];
        self.no_bids = [0; 101];
        for &(p, q) in yes {
            if valid_price(p) {
                self.yes_bids[p as usize] = q.max(0);
            }
        }
        for &(p, q) in no {
            if valid_price(p) {
                self.no_bids[p as usize] = q.max(0);
            }
        }
        self.last_ts_ms = ts_ms;
    }

    /// Merge a delta into the ladder. Timestamps per ticker must not go
    /// backwards; a stale delta is dropped and `false` is returned so the
    /// caller can count it.
    pub fn apply_delta(&mut self, ts_ms: i64, side: Side, price: u8, delta: i64) -> bool {
        if ts_ms < self.last_ts_ms {
            return false;
        }
        self.last_ts_ms = ts_ms;

        if !valid_price(price) {
            return true;
        }

        let arr = match side {
            Side::Yes => &mut self.yes_bids,
            Side::No => &mut self.no_bids,
        };
        let idx = price as usize;
        // A delta driving the level negative removes it.
        arr[idx] = (arr[idx] + delta).max(0);
        true
    }

    pub fn best_bid(&self, side: Side) -> Option<u8> {
        let arr = match side {
            Side::Yes => &self.yes_bids,
            Side::No => &self.no_bids,
        };
        for p in (1..=99).rev() {
            if arr[p] > 0 {
                return Some(p as u8);
            }
        }
        None
    }

    pub fn implied_ask(&self, side: Side) -> Option<u8> {
        let ask = 100u8.saturating_sub(self.best_bid(side.other())?);
        valid_price(ask).then_some(ask)
    }

    pub fn last_ts_ms(&self) -> i64 {
        self.last_ts_ms
    }

    /// Current best-of-book as a value sample, stamped with the book's
    /// latest timestamp.
    pub fn sample(&self) -> Sample {
        Sample {
            ts_ms: self.last_ts_ms,
            yes_bid: self.best_bid(Side::Yes),
            yes_ask: self.implied_ask(Side::Yes),
            no_bid: self.best_bid(Side::No),
            no_ask: self.implied_ask(Side::No),
        }
    }
}
