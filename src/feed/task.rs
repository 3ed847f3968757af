use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::feed::{FeedEvent, MarketFeed};
use crate::state::book::Book;
use crate::state::Inbox;

/// Control messages from discovery (attach) and retiring traders (detach).
#[derive(Debug)]
pub enum RouterCommand {
    Attach { ticker: String, inbox: Arc<Inbox> },
    Detach { ticker: String },
}

struct Route {
    book: Book,
    inbox: Arc<Inbox>,
}

/// Fan-out of the single order-book stream to per-market traders.
///
/// Owns the per-ticker best-of-book projections and the routing table.
/// Subscription changes are debounced and flushed in batches; samples are
/// handed to traders by value, so a slow trader can never block ingest.
pub async fn run_router(
    mut feed: Box<dyn MarketFeed>,
    mut ctl_rx: mpsc::Receiver<RouterCommand>,
    debounce_ms: u64,
) -> Result<()> {
    let mut routes: HashMap<String, Route> = HashMap::new();
    let mut pending_add: Vec<String> = Vec::new();
    let mut pending_remove: Vec<String> = Vec::new();
    let mut stale_dropped: u64 = 0;

    let mut flush = time::interval(Duration::from_millis(debounce_ms.max(1)));
    flush.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = feed.next_event() => {
                match event? {
                    FeedEvent::Snapshot { ticker, ts_ms, yes, no } => {
                        let Some(route) = routes.get_mut(&ticker) else { continue };
                        route.book.reset(ts_ms, &yes, &no);
                        let sample = route.book.sample();
                        if sample.is_admissible() {
                            route.inbox.push(sample);
                        }
                    }
                    FeedEvent::Delta { ticker, ts_ms, side, price, delta_qty } => {
                        let Some(route) = routes.get_mut(&ticker) else { continue };
                        if !route.book.apply_delta(ts_ms, side, price, delta_qty) {
                            stale_dropped += 1;
                            debug!(ticker, ts_ms, stale_dropped, "dropped out-of-order delta");
                            continue;
                        }
                        let sample = route.book.sample();
                        if sample.is_admissible() {
                            route.inbox.push(sample);
                        }
                    }
                    FeedEvent::Subscribed { tickers } => {
                        info!(count = tickers.len(), "feed subscription confirmed");
                    }
                    FeedEvent::FeedError { code, msg } => {
                        warn!(code, msg, "feed error");
                    }
                }
            }

            cmd = ctl_rx.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                match cmd {
                    RouterCommand::Attach { ticker, inbox } => {
                        pending_add.push(ticker.clone());
                        routes.insert(ticker, Route { book: Book::default(), inbox });
                    }
                    RouterCommand::Detach { ticker } => {
                        routes.remove(&ticker);
                        pending_remove.push(ticker);
                    }
                }
            }

            _ = flush.tick() => {
                if pending_add.is_empty() && pending_remove.is_empty() {
                    continue;
                }
                let add = std::mem::take(&mut pending_add);
                let remove = std::mem::take(&mut pending_remove);
                if let Err(e) = feed.update_subscriptions(add.clone(), remove.clone()).await {
                    warn!(error = %e, "subscription update failed; will retry");
                    pending_add.extend(add);
                    pending_remove.extend(remove);
                }
            }
        }
    }
}
