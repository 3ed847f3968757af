use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::trader::{self, TraderDeps};
use crate::exec::{ExchangeApi, MarketQuote};
use crate::feed::task::RouterCommand;
use crate::state::Phase;

/// Liquid means tradeable: both yes quotes present, a tight spread, and
/// (when the filter is enabled) real volume.
fn is_liquid(cfg: &Config, q: &MarketQuote) -> bool {
    let (Some(bid), Some(ask)) = (q.yes_bid, q.yes_ask) else {
        return false;
    };
    if ask as i64 - bid as i64 > cfg.max_spread_cents {
        return false;
    }
    cfg.min_volume == 0 || q.volume >= cfg.min_volume
}

/// Market discovery control plane.
///
/// Periodically classifies open markets by liquidity, spawns traders for
/// newly liquid tickers (highest volume first when capped) and retires Flat
/// traders whose market dried up. A trader with an open round trip is pinned
/// until it gets back to Flat.
pub struct Discovery {
    cfg: Config,
    exchange: Arc<dyn ExchangeApi>,
    router_tx: mpsc::Sender<RouterCommand>,
    deps: TraderDeps,
    shutdown: watch::Receiver<bool>,
}

impl Discovery {
    pub fn new(
        cfg: Config,
        exchange: Arc<dyn ExchangeApi>,
        router_tx: mpsc::Sender<RouterCommand>,
        deps: TraderDeps,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            exchange,
            router_tx,
            deps,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut interval = time::interval(Duration::from_secs(self.cfg.market_scan_interval_secs));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
            }

            let quotes = match self.exchange.list_open_markets().await {
                Ok(q) => q,
                Err(e) => {
                    warn!(error = %e, "market scan failed; retrying next interval");
                    continue;
                }
            };
            self.scan(quotes).await;
        }
    }

    pub async fn scan(&self, quotes: Vec<MarketQuote>) {
        let mut liquid: Vec<&MarketQuote> =
            quotes.iter().filter(|q| is_liquid(&self.cfg, q)).collect();
        // When capped, the highest-volume candidates take precedence.
        liquid.sort_by_key(|q| std::cmp::Reverse(q.volume));

        let liquid_set: HashSet<&str> = liquid.iter().map(|q| q.ticker.as_str()).collect();
        let running: Vec<String> = self.deps.shared.tickers();
        let running_set: HashSet<&str> = running.iter().map(|s| s.as_str()).collect();

        for q in &liquid {
            if running_set.contains(q.ticker.as_str()) {
                continue;
            }
            if self.deps.shared.len() >= self.cfg.max_markets {
                debug!(
                    ticker = %q.ticker,
                    max_markets = self.cfg.max_markets,
                    "at market cap; skipping candidate"
                );
                break;
            }
            info!(ticker = %q.ticker, volume = q.volume, "market liquid; starting trader");
            let handle = trader::spawn(self.cfg.clone(), q.ticker.clone(), self.deps.clone());
            let _ = self
                .router_tx
                .send(RouterCommand::Attach {
                    ticker: q.ticker.clone(),
                    inbox: handle.inbox.clone(),
                })
                .await;
        }

        for ticker in &running {
            if liquid_set.contains(ticker.as_str()) {
                continue;
            }
            let Some(handle) = self.deps.shared.get(ticker) else {
                continue;
            };
            match handle.phase.get() {
                Phase::Flat => {
                    info!(ticker = %ticker, "market illiquid; retiring trader");
                    handle.retire.notify_one();
                }
                phase => {
                    // Pinned by an open round trip; try again next scan.
                    debug!(ticker = %ticker, ?phase, "retire deferred");
                }
            }
        }
    }
}
