use std::collections::HashSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use kalshi_rs::websocket::models::KalshiSocketMessage;
use kalshi_rs::KalshiWebsocketClient;

use crate::feed::{FeedEvent, MarketFeed};
use crate::types::Side;

const ORDERBOOK_CHANNEL: &str = "orderbook_delta";
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_CONNECT_FAILURES: u32 = 10;

fn parse_side(s: &str) -> Option<Side> {
    match s.to_ascii_lowercase().as_str() {
        "yes" => Some(Side::Yes),
        "no" => Some(Side::No),
        _ => None,
    }
}

/// Delta timestamps arrive as RFC3339; fall back to arrival time when they
/// do not parse.
fn parse_ts_ms(ts: &str) -> i64 {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .unwrap_or_else(|_| Utc::now().timestamp_millis())
}

/// Live market data over the Kalshi websocket.
///
/// Tracks the intended market set locally so a reconnect resubscribes the
/// whole set, which replays snapshots for every market.
pub struct KalshiFeed {
    ws: KalshiWebsocketClient,
    markets: HashSet<String>,
    sid: Option<u64>,
    connected: bool,
    connect_failures: u32,
}

impl KalshiFeed {
    pub fn new(ws: KalshiWebsocketClient) -> Self {
        Self {
            ws,
            markets: HashSet::new(),
            sid: None,
            connected: false,
            connect_failures: 0,
        }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        while !self.connected {
            if let Err(e) = self.ws.connect().await {
                self.connect_failures += 1;
                warn!(attempt = self.connect_failures, "ws connect failed: {e}");
                if self.connect_failures >= MAX_CONNECT_FAILURES {
                    return Err(anyhow!("feed unreachable after {MAX_CONNECT_FAILURES} attempts"));
                }
                sleep(RECONNECT_DELAY).await;
                continue;
            }

            // New connection, new subscription ids.
            self.sid = None;

            if !self.markets.is_empty() {
                let tickers: Vec<String> = self.markets.iter().cloned().collect();
                let refs: Vec<&str> = tickers.iter().map(|s| s.as_str()).collect();
                if let Err(e) = self.ws.subscribe(vec![ORDERBOOK_CHANNEL], refs).await {
                    warn!("ws subscribe failed: {e}");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            }

            self.connected = true;
            self.connect_failures = 0;
            info!(markets = self.markets.len(), "ws connected and subscribed");
        }
        Ok(())
    }
}

#[async_trait]
impl MarketFeed for KalshiFeed {
    async fn next_event(&mut self) -> Result<FeedEvent> {
        loop {
            self.ensure_connected().await?;

            let msg = match self.ws.next_message().await {
                Ok(m) => m,
                Err(e) => {
                    warn!("ws read error: {e} (reconnecting)");
                    self.connected = false;
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            match msg {
                KalshiSocketMessage::SubscribedResponse(sr) => {
                    if sr.msg.channel == ORDERBOOK_CHANNEL {
                        self.sid = Some(sr.msg.sid as u64);
                    }
                    return Ok(FeedEvent::Subscribed {
                        tickers: self.markets.iter().cloned().collect(),
                    });
                }
                KalshiSocketMessage::OkResponse(ok) => {
                    info!(sid = ok.sid, markets = ?ok.msg.market_tickers, "subscription updated");
                }
                KalshiSocketMessage::ErrorResponse(err) => {
                    return Ok(FeedEvent::FeedError {
                        code: err.msg.code,
                        msg: err.msg.msg,
                    });
                }
                KalshiSocketMessage::OrderbookSnapshot(snap) => {
                    let m = snap.msg;
                    return Ok(FeedEvent::Snapshot {
                        ticker: m.market_ticker,
                        ts_ms: Utc::now().timestamp_millis(),
                        yes: m.yes.unwrap_or_default(),
                        no: m.no.unwrap_or_default(),
                    });
                }
                KalshiSocketMessage::OrderbookDelta(delta) => {
                    let m = delta.msg;
                    let Some(side) = parse_side(&m.side) else { continue };
                    return Ok(FeedEvent::Delta {
                        ticker: m.market_ticker,
                        ts_ms: parse_ts_ms(&m.ts),
                        side,
                        price: m.price,
                        delta_qty: m.delta,
                    });
                }
                // Heartbeats and channels we do not subscribe to.
                _ => {}
            }
        }
    }

    async fn update_subscriptions(&mut self, add: Vec<String>, remove: Vec<String>) -> Result<()> {
        for t in &add {
            self.markets.insert(t.clone());
        }
        for t in &remove {
            self.markets.remove(t);
        }

        if !self.connected {
            // The next reconnect subscribes the full set.
            return Ok(());
        }

        let Some(sid) = self.sid else {
            // Connected but nothing subscribed yet (the first attach lands
            // here): open the orderbook subscription for the full set.
            if !self.markets.is_empty() {
                let tickers: Vec<String> = self.markets.iter().cloned().collect();
                let refs: Vec<&str> = tickers.iter().map(|s| s.as_str()).collect();
                self.ws
                    .subscribe(vec![ORDERBOOK_CHANNEL], refs)
                    .await
                    .map_err(|e| anyhow!("subscribe: {e}"))?;
            }
            return Ok(());
        };

        // Add before delete to avoid coverage gaps.
        if !add.is_empty() {
            let refs: Vec<&str> = add.iter().map(|s| s.as_str()).collect();
            self.ws
                .add_markets(vec![sid], refs)
                .await
                .map_err(|e| anyhow!("add_markets: {e}"))?;
        }
        if !remove.is_empty() {
            let refs: Vec<&str> = remove.iter().map(|s| s.as_str()).collect();
            self.ws
                .del_markets(vec![sid], refs)
                .await
                .map_err(|e| anyhow!("del_markets: {e}"))?;
        }
        Ok(())
    }
}
