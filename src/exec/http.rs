use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use kalshi_rs::markets::models::MarketsQuery;
use kalshi_rs::portfolio::models::CreateOrderRequest;
use kalshi_rs::KalshiClient;

use crate::exec::{AckStatus, CancelOutcome, ExchangeApi, MarketQuote, OrderAck, OrderAction};
use crate::types::{valid_price, Side};

const DEMO_API: &str = "https://demo-api.kalshi.co/trade-api/v2";

/// Live order entry over the Kalshi REST API.
pub struct KalshiExchange {
    client: Arc<KalshiClient>,
}

impl KalshiExchange {
    pub fn new(client: Arc<KalshiClient>) -> Self {
        Self { client }
    }

    pub fn base_url(use_demo: bool) -> Option<String> {
        use_demo.then(|| DEMO_API.to_string())
    }
}

fn quote(price: u32) -> Option<u8> {
    u8::try_from(price).ok().filter(|p| valid_price(*p))
}

#[async_trait]
impl ExchangeApi for KalshiExchange {
    async fn place_order(
        &self,
        ticker: &str,
        side: Side,
        action: OrderAction,
        limit_price: u8,
        size: u32,
        client_order_id: Uuid,
    ) -> Result<OrderAck> {
        let (yes_price, no_price) = match side {
            Side::Yes => (Some(limit_price as u64), None),
            Side::No => (None, Some(limit_price as u64)),
        };

        // CreateOrderRequest has no Default in kalshi-rs 0.2.1, so every
        // field is spelled out.
        let req = CreateOrderRequest {
            ticker: ticker.to_string(),
            side: side.as_str().to_string(),
            action: action.as_str().to_string(),
            count: size as u64,

            client_order_id: Some(client_order_id.to_string()),
            type_: Some("limit".to_string()),
            yes_price,
            no_price,

            yes_price_dollars: None,
            no_price_dollars: None,
            expiration_ts: None,
            time_in_force: Some("gtc".to_string()),
            buy_max_cost: None,

            post_only: Some(false),
            reduce_only: None,
            self_trade_prevention_type: None,
            order_group_id: None,
            cancel_order_on_pause: None,
        };

        let resp = self
            .client
            .create_order(&req)
            .await
            .map_err(|e| anyhow!("create_order: {e}"))?;
        let order = resp.order;

        let filled_qty = order.fill_count.unwrap_or(0).min(size as u64) as u32;
        let status = match order.status.as_str() {
            "executed" | "filled" => {
                if filled_qty >= size {
                    AckStatus::Filled
                } else {
                    AckStatus::PartiallyFilled
                }
            }
            "canceled" | "cancelled" => AckStatus::Rejected,
            _ if filled_qty >= size => AckStatus::Filled,
            _ if filled_qty > 0 => AckStatus::PartiallyFilled,
            // "resting", "pending" and anything new: assume it is working.
            _ => AckStatus::Resting,
        };

        let avg_fill_price = match (order.taker_fill_cost, filled_qty) {
            (Some(cost), n) if n > 0 => u8::try_from(cost / n as u64).ok(),
            _ => None,
        }
        .filter(|p| valid_price(*p));

        Ok(OrderAck {
            order_id: order.order_id,
            status,
            filled_qty,
            avg_fill_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome> {
        match self.client.cancel_order(order_id.to_string()).await {
            Ok(_) => Ok(CancelOutcome::Canceled),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("404") || msg.to_lowercase().contains("not found") {
                    Ok(CancelOutcome::NotFound)
                } else {
                    Err(anyhow!("cancel_order: {msg}"))
                }
            }
        }
    }

    async fn list_open_markets(&self) -> Result<Vec<MarketQuote>> {
        let params = MarketsQuery {
            status: Some("open".to_string()),
            ..Default::default()
        };
        let resp = self
            .client
            .get_all_markets(&params)
            .await
            .map_err(|e| anyhow!("get_all_markets: {e}"))?;

        Ok(resp
            .markets
            .into_iter()
            .map(|m| MarketQuote {
                yes_bid: quote(m.yes_bid),
                yes_ask: quote(m.yes_ask),
                no_bid: quote(m.no_bid),
                no_ask: quote(m.no_ask),
                volume: m.volume as i64,
                ticker: m.ticker,
            })
            .collect())
    }

    async fn get_balance(&self) -> Result<i64> {
        let resp = self
            .client
            .get_balance()
            .await
            .map_err(|e| anyhow!("get_balance: {e}"))?;
        Ok(resp.balance as i64)
    }
}
