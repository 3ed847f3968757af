use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::types::{ExitReason, Side};

/// One round trip. Immutable once the exit fields are filled in.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub ticker: String,
    pub side: Side,
    pub size: u32,
    pub entry_price: u8,
    pub exit_price: Option<u8>,
    pub opened_at_ms: i64,
    pub closed_at_ms: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl_cents: Option<i64>,
}

/// Per-contract P&L on the held side, fee charged once per round trip.
pub fn round_trip_pnl_cents(size: u32, entry_price: u8, exit_price: u8, fee_cents: i64) -> i64 {
    (exit_price as i64 - entry_price as i64 - fee_cents) * size as i64
}

/// Where closed trades go for durability. The tracker itself is in-memory.
pub trait TradeSink: Send + Sync {
    fn append(&self, record: &TradeRecord) -> Result<()>;
}

/// Appends one JSON object per closed trade.
pub struct JsonlSink {
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening trade log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TradeSink for JsonlSink {
    fn append(&self, record: &TradeRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut f = self.file.lock().expect("trade log lock poisoned");
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickerStats {
    pub trades: u32,
    pub realized_pnl_cents: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub wins: u32,
    pub losses: u32,
    pub open_positions: usize,
    pub realized_pnl_cents: i64,
    pub per_ticker: HashMap<String, TickerStats>,
}

#[derive(Default)]
struct LedgerState {
    open: HashMap<String, TradeRecord>,
    closed: Vec<TradeRecord>,
    wins: u32,
    losses: u32,
    realized_pnl_cents: i64,
    per_ticker: HashMap<String, TickerStats>,
}

/// Append-only ledger of entries and exits.
pub struct TradeTracker {
    inner: Mutex<LedgerState>,
    sink: Option<Box<dyn TradeSink>>,
}

impl TradeTracker {
    pub fn new(sink: Option<Box<dyn TradeSink>>) -> Self {
        Self {
            inner: Mutex::new(LedgerState::default()),
            sink,
        }
    }

    pub fn record_entry(
        &self,
        ticker: &str,
        side: Side,
        size: u32,
        entry_price: u8,
        opened_at_ms: i64,
    ) {
        let mut st = self.inner.lock().expect("ledger lock poisoned");
        if st.open.contains_key(ticker) {
            warn!(ticker, "entry recorded while a round trip is still open; ignoring");
            return;
        }
        st.open.insert(
            ticker.to_string(),
            TradeRecord {
                ticker: ticker.to_string(),
                side,
                size,
                entry_price,
                exit_price: None,
                opened_at_ms,
                closed_at_ms: None,
                exit_reason: None,
                realized_pnl_cents: None,
            },
        );
    }

    pub fn record_exit(
        &self,
        ticker: &str,
        exit_price: u8,
        closed_at_ms: i64,
        reason: ExitReason,
        realized_pnl_cents: i64,
    ) {
        let record = {
            let mut st = self.inner.lock().expect("ledger lock poisoned");
            let Some(mut record) = st.open.remove(ticker) else {
                warn!(ticker, "exit recorded with no open round trip; ignoring");
                return;
            };
            record.exit_price = Some(exit_price);
            record.closed_at_ms = Some(closed_at_ms);
            record.exit_reason = Some(reason);
            record.realized_pnl_cents = Some(realized_pnl_cents);

            if realized_pnl_cents >= 0 {
                st.wins += 1;
            } else {
                st.losses += 1;
            }
            st.realized_pnl_cents += realized_pnl_cents;
            let stats = st.per_ticker.entry(ticker.to_string()).or_default();
            stats.trades += 1;
            stats.realized_pnl_cents += realized_pnl_cents;

            st.closed.push(record.clone());
            record
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&record) {
                warn!(ticker, error = %e, "failed to persist trade record");
            }
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let st = self.inner.lock().expect("ledger lock poisoned");
        TrackerSnapshot {
            wins: st.wins,
            losses: st.losses,
            open_positions: st.open.len(),
            realized_pnl_cents: st.realized_pnl_cents,
            per_ticker: st.per_ticker.clone(),
        }
    }

    pub fn closed_trades(&self) -> Vec<TradeRecord> {
        self.inner.lock().expect("ledger lock poisoned").closed.clone()
    }

    pub fn open_trade(&self, ticker: &str) -> Option<TradeRecord> {
        self.inner
            .lock()
            .expect("ledger lock poisoned")
            .open
            .get(ticker)
            .cloned()
    }
}
