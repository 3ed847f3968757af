use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::exec::{AckStatus, CancelOutcome, ExchangeApi, MarketQuote, OrderAck, OrderAction};
use crate::types::Side;

#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: OrderAction,
    pub limit_price: u8,
    pub size: u32,
    pub client_order_id: Uuid,
}

/// In-memory exchange: every limit order fills at its limit price. Used by
/// paper execution mode and as the fake behind the integration tests, which
/// can flip it into resting mode to exercise the timeout/cancel races.
#[derive(Default)]
pub struct PaperExchange {
    orders: Mutex<Vec<PaperOrder>>,
    markets: Mutex<Vec<MarketQuote>>,
    balance_cents: AtomicU64,
    resting: AtomicBool,
    cancel_not_found: AtomicBool,
}

impl PaperExchange {
    pub fn new() -> Self {
        let ex = Self::default();
        ex.balance_cents.store(100_000, Ordering::Relaxed);
        ex
    }

    pub fn set_markets(&self, markets: Vec<MarketQuote>) {
        *self.markets.lock().expect("paper lock poisoned") = markets;
    }

    /// When set, new orders rest instead of filling.
    pub fn set_resting(&self, resting: bool) {
        self.resting.store(resting, Ordering::Relaxed);
    }

    /// When set, cancels report the order as already gone (filled).
    pub fn set_cancel_not_found(&self, not_found: bool) {
        self.cancel_not_found.store(not_found, Ordering::Relaxed);
    }

    pub fn placed_orders(&self) -> Vec<PaperOrder> {
        self.orders.lock().expect("paper lock poisoned").clone()
    }
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn place_order(
        &self,
        ticker: &str,
        side: Side,
        action: OrderAction,
        limit_price: u8,
        size: u32,
        client_order_id: Uuid,
    ) -> Result<OrderAck> {
        let order_id = format!("paper-{}", Uuid::new_v4());
        self.orders.lock().expect("paper lock poisoned").push(PaperOrder {
            order_id: order_id.clone(),
            ticker: ticker.to_string(),
            side,
            action,
            limit_price,
            size,
            client_order_id,
        });

        if self.resting.load(Ordering::Relaxed) {
            info!(ticker, ?side, ?action, limit_price, size, "paper order resting");
            return Ok(OrderAck {
                order_id,
                status: AckStatus::Resting,
                filled_qty: 0,
                avg_fill_price: None,
            });
        }

        info!(ticker, ?side, ?action, limit_price, size, "paper fill at limit");
        Ok(OrderAck {
            order_id,
            status: AckStatus::Filled,
            filled_qty: size,
            avg_fill_price: Some(limit_price),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome> {
        if self.cancel_not_found.load(Ordering::Relaxed) {
            info!(order_id, "paper cancel: already filled");
            return Ok(CancelOutcome::NotFound);
        }
        info!(order_id, "paper cancel ack");
        Ok(CancelOutcome::Canceled)
    }

    async fn list_open_markets(&self) -> Result<Vec<MarketQuote>> {
        Ok(self.markets.lock().expect("paper lock poisoned").clone())
    }

    async fn get_balance(&self) -> Result<i64> {
        Ok(self.balance_cents.load(Ordering::Relaxed) as i64)
    }
}
