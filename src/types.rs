use serde::Serialize;

/// Mids and the gap are carried in tenths of a cent so that half-cent
/// midpoints stay exact between samples.
pub const TENTHS_PER_CENT: i64 = 10;

/// Valid contract prices are 1..=99 cents; anything else is book noise.
pub fn valid_price(p: u8) -> bool {
    (1..=99).contains(&p)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    Reversal,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Reversal => "reversal",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

/// Best-of-book observation for one market at one instant.
///
/// A sample is admissible when at least one side has a quote; mids and gap
/// are derivable only from what is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub ts_ms: i64,
    pub yes_bid: Option<u8>,
    pub yes_ask: Option<u8>,
    pub no_bid: Option<u8>,
    pub no_ask: Option<u8>,
}

impl Sample {
    pub fn is_admissible(&self) -> bool {
        self.yes_bid.is_some()
            || self.yes_ask.is_some()
            || self.no_bid.is_some()
            || self.no_ask.is_some()
    }

    fn mid_tenths(bid: Option<u8>, ask: Option<u8>) -> Option<i64> {
        match (bid, ask) {
            (Some(b), Some(a)) => Some((b as i64 + a as i64) * TENTHS_PER_CENT / 2),
            (Some(b), None) => Some(b as i64 * TENTHS_PER_CENT),
            (None, Some(a)) => Some(a as i64 * TENTHS_PER_CENT),
            (None, None) => None,
        }
    }

    pub fn yes_mid_tenths(&self) -> Option<i64> {
        Self::mid_tenths(self.yes_bid, self.yes_ask)
    }

    pub fn no_mid_tenths(&self) -> Option<i64> {
        Self::mid_tenths(self.no_bid, self.no_ask)
    }

    /// 100¢ − yes_mid − no_mid, signed; negative on a crossed book.
    pub fn gap_tenths(&self) -> Option<i64> {
        Some(100 * TENTHS_PER_CENT - self.yes_mid_tenths()? - self.no_mid_tenths()?)
    }

    pub fn side_mid_tenths(&self, side: Side) -> Option<i64> {
        match side {
            Side::Yes => self.yes_mid_tenths(),
            Side::No => self.no_mid_tenths(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub confidence: f64,
    pub gap_change_tenths: i64,
    pub yes_change_tenths: i64,
}

impl Signal {
    pub fn neutral() -> Self {
        Signal {
            kind: SignalKind::Neutral,
            confidence: 0.0,
            gap_change_tenths: 0,
            yes_change_tenths: 0,
        }
    }

    /// The side an entry would take if this signal fires.
    pub fn entry_side(&self) -> Option<Side> {
        match self.kind {
            SignalKind::Bullish => Some(Side::Yes),
            SignalKind::Bearish => Some(Side::No),
            SignalKind::Neutral => None,
        }
    }
}
