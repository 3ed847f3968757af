pub mod kalshi;
pub mod task;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Side;

/// Typed messages the fan-out is programmed against.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Snapshot {
        ticker: String,
        ts_ms: i64,
        yes: Vec<(u8, i64)>,
        no: Vec<(u8, i64)>,
    },
    Delta {
        ticker: String,
        ts_ms: i64,
        side: Side,
        price: u8,
        delta_qty: i64,
    },
    Subscribed {
        tickers: Vec<String>,
    },
    /// Transient feed-side error; logged and counted, never fatal.
    FeedError {
        code: i64,
        msg: String,
    },
}

/// Market-data capability. The live implementation reconnects and replays
/// snapshots internally; an `Err` from `next_event` is unrecoverable and
/// shuts the engine down.
#[async_trait]
pub trait MarketFeed: Send {
    async fn next_event(&mut self) -> Result<FeedEvent>;

    async fn update_subscriptions(&mut self, add: Vec<String>, remove: Vec<String>) -> Result<()>;
}
