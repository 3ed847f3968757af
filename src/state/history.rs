use std::collections::VecDeque;

/// Smallest sample spacing the capacity formula assumes; bursts beyond this
/// just evict a little earlier.
const MIN_SAMPLE_INTERVAL_MS: i64 = 50;
const CAPACITY_SLACK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub ts_ms: i64,
    pub yes_mid_tenths: i64,
    pub no_mid_tenths: i64,
    pub gap_tenths: i64,
}

/// Bounded, time-ordered mid/gap history for one market.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    buf: VecDeque<HistoryEntry>,
    capacity: usize,
    dropped_stale: u64,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
            dropped_stale: 0,
        }
    }

    /// Capacity sized so a full momentum window fits even at the fastest
    /// sample cadence.
    pub fn for_window(window_seconds: i64) -> Self {
        let window_ms = window_seconds.max(1) * 1000;
        let cap = (window_ms / MIN_SAMPLE_INTERVAL_MS) as usize + CAPACITY_SLACK;
        Self::new(cap)
    }

    /// Append if strictly newer than the tail; out-of-order entries are
    /// dropped. Evicts the head at capacity.
    pub fn insert(&mut self, entry: HistoryEntry) -> bool {
        if let Some(last) = self.buf.back() {
            if entry.ts_ms <= last.ts_ms {
                self.dropped_stale += 1;
                return false;
            }
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(entry);
        true
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn dropped_stale(&self) -> u64 {
        self.dropped_stale
    }

    /// The oldest entry still inside `[t_now - window, t_now]` paired with
    /// the latest entry, or None when fewer than two distinct samples span
    /// the window.
    pub fn window_at(&self, t_now_ms: i64, window_seconds: i64) -> Option<(&HistoryEntry, &HistoryEntry)> {
        let latest = self.buf.back()?;
        let horizon = t_now_ms - window_seconds.max(0) * 1000;
        let oldest = self.buf.iter().find(|e| e.ts_ms >= horizon)?;
        if oldest.ts_ms >= latest.ts_ms {
            return None;
        }
        Some((oldest, latest))
    }
}
