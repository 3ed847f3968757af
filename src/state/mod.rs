pub mod book;
pub mod history;
pub mod position;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::types::Sample;

/// Externally visible trader state. The trader itself is the source of
/// truth; this cell exists so discovery and shutdown can observe without
/// touching trader internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Flat = 0,
    Holding = 1,
    Exiting = 2,
    Retired = 3,
}

#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    pub fn get(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            1 => Phase::Holding,
            2 => Phase::Exiting,
            3 => Phase::Retired,
            _ => Phase::Flat,
        }
    }
}

/// Bounded per-trader sample queue. On overflow the oldest sample is
/// dropped; the book re-converges on the next delta.
#[derive(Debug)]
pub struct Inbox {
    capacity: usize,
    queue: Mutex<VecDeque<Sample>>,
    pub notify: Notify,
    dropped: AtomicU64,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, sample: Sample) {
        {
            let mut q = self.queue.lock().expect("inbox lock poisoned");
            if q.len() == self.capacity {
                q.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(sample);
        }
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Vec<Sample> {
        let mut q = self.queue.lock().expect("inbox lock poisoned");
        q.drain(..).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle the rest of the system keeps for a running trader.
#[derive(Debug, Clone)]
pub struct TraderHandle {
    pub ticker: String,
    pub inbox: Arc<Inbox>,
    pub phase: Arc<PhaseCell>,
    pub retire: Arc<Notify>,
}

/// Shared registry of live traders, keyed by ticker. Traders remove
/// themselves when they retire.
#[derive(Clone, Debug, Default)]
pub struct Shared {
    pub traders: Arc<DashMap<String, TraderHandle>>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            traders: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, handle: TraderHandle) {
        self.traders.insert(handle.ticker.clone(), handle);
    }

    pub fn remove(&self, ticker: &str) {
        self.traders.remove(ticker);
    }

    pub fn get(&self, ticker: &str) -> Option<TraderHandle> {
        self.traders.get(ticker).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.traders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traders.is_empty()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.traders.iter().map(|e| e.key().clone()).collect()
    }
}
