pub mod http;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderAction::Buy => "buy",
            OrderAction::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Filled,
    PartiallyFilled,
    Resting,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: AckStatus,
    pub filled_qty: u32,
    pub avg_fill_price: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    /// The exchange no longer knows the order: it filled before the cancel.
    NotFound,
}

/// One row of the open-markets listing used by discovery. Absent quotes are
/// None (the exchange reports 0 for an empty side).
#[derive(Debug, Clone)]
pub struct MarketQuote {
    pub ticker: String,
    pub yes_bid: Option<u8>,
    pub yes_ask: Option<u8>,
    pub no_bid: Option<u8>,
    pub no_ask: Option<u8>,
    pub volume: i64,
}

/// Order-entry capability. Implemented by the live REST client and by the
/// in-memory paper exchange, so the engine and its tests run against the
/// same surface.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn place_order(
        &self,
        ticker: &str,
        side: Side,
        action: OrderAction,
        limit_price: u8,
        size: u32,
        client_order_id: Uuid,
    ) -> Result<OrderAck>;

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome>;

    async fn list_open_markets(&self) -> Result<Vec<MarketQuote>>;

    async fn get_balance(&self) -> Result<i64>;
}
