//! End-to-end scenarios: traders spawned as real tasks, fed synthetic
//! best-of-book samples, executing against the in-memory paper exchange
//! under a paused tokio clock.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use kalshi_momentum::config::Config;
use kalshi_momentum::discovery::Discovery;
use kalshi_momentum::engine::trader::{self, TraderDeps};
use kalshi_momentum::exec::paper::PaperExchange;
use kalshi_momentum::exec::{MarketQuote, OrderAction};
use kalshi_momentum::feed::task::RouterCommand;
use kalshi_momentum::ledger::TradeTracker;
use kalshi_momentum::risk::RiskManager;
use kalshi_momentum::state::{Phase, Shared, TraderHandle};
use kalshi_momentum::types::{ExitReason, Sample, Side};

struct Rig {
    cfg: Config,
    risk: Arc<RiskManager>,
    tracker: Arc<TradeTracker>,
    exchange: Arc<PaperExchange>,
    shared: Shared,
    shutdown_tx: watch::Sender<bool>,
    router_tx: mpsc::Sender<RouterCommand>,
    router_rx: mpsc::Receiver<RouterCommand>,
}

impl Rig {
    fn new(cfg: Config) -> Self {
        let risk = Arc::new(RiskManager::from_config(&cfg));
        let tracker = Arc::new(TradeTracker::new(None));
        let exchange = Arc::new(PaperExchange::new());
        let shared = Shared::new();
        let (shutdown_tx, _) = watch::channel(false);
        let (router_tx, router_rx) = mpsc::channel(64);
        Self {
            cfg,
            risk,
            tracker,
            exchange,
            shared,
            shutdown_tx,
            router_tx,
            router_rx,
        }
    }

    fn deps(&self) -> TraderDeps {
        TraderDeps {
            risk: self.risk.clone(),
            tracker: self.tracker.clone(),
            exchange: self.exchange.clone(),
            shared: self.shared.clone(),
            router_tx: self.router_tx.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        }
    }

    fn spawn(&self, ticker: &str) -> TraderHandle {
        trader::spawn(self.cfg.clone(), ticker.to_string(), self.deps())
    }
}

fn test_config() -> Config {
    Config {
        api_key: "test".into(),
        momentum_window_seconds: 5,
        entry_threshold_cents: 2,
        convergence_threshold_pct: 3,
        stop_loss_cents: 2,
        trailing_stop_cents: 2,
        kalshi_fee_cents: 1,
        order_size: 5,
        // Keep post-exit ticks from immediately re-entering in scenarios
        // that end flat.
        cooldown_seconds: 300,
        ..Config::default()
    }
}

fn sample(ts_ms: i64, yes_bid: u8, yes_ask: u8, no_bid: u8, no_ask: u8) -> Sample {
    Sample {
        ts_ms,
        yes_bid: Some(yes_bid),
        yes_ask: Some(yes_ask),
        no_bid: Some(no_bid),
        no_ask: Some(no_ask),
    }
}

/// S1: bullish entry on gap convergence, then a trailing-stop exit.
#[tokio::test(start_paused = true)]
async fn s1_bullish_entry_and_trailing_exit() {
    let rig = Rig::new(test_config());
    let handle = rig.spawn("X");

    // gap 10c.
    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    assert!(rig.tracker.open_trade("X").is_none());

    // gap 7c, yes +5c: 30% shrink -> bullish entry at mid+1 = 36.
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;

    let open = rig.tracker.open_trade("X").expect("entered");
    assert_eq!(open.side, Side::Yes);
    assert_eq!(open.entry_price, 36);
    assert_eq!(open.size, 5);
    assert_eq!(rig.risk.total_exposure_cents(), 180);
    assert_eq!(handle.phase.get(), Phase::Holding);

    // yes mid 40: high water mark ratchets, trailing moves to 38.
    handle.inbox.push(sample(6000, 39, 41, 56, 58));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.phase.get(), Phase::Holding);

    // yes mid 37 <= trailing 38: exit, sell at mid-1 = 36.
    handle.inbox.push(sample(7000, 36, 38, 57, 59));
    sleep(Duration::from_millis(700)).await;

    assert_eq!(handle.phase.get(), Phase::Flat);
    assert_eq!(rig.risk.total_exposure_cents(), 0);

    let closed = rig.tracker.closed_trades();
    assert_eq!(closed.len(), 1);
    let trade = &closed[0];
    assert_eq!(trade.exit_reason, Some(ExitReason::TrailingStop));
    assert_eq!(trade.exit_price, Some(36));
    // (36 - 36 - 1) x 5 contracts.
    assert_eq!(trade.realized_pnl_cents, Some(-5));

    // One buy, one sell, nothing else.
    let orders = rig.exchange.placed_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].action, OrderAction::Buy);
    assert_eq!(orders[1].action, OrderAction::Sell);
}

/// S2: adverse move straight through the stop-loss.
#[tokio::test(start_paused = true)]
async fn s2_stop_loss_exit() {
    let rig = Rig::new(test_config());
    let handle = rig.spawn("X");

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    assert_eq!(rig.tracker.open_trade("X").unwrap().entry_price, 36);

    // yes mid 32 <= stop 33: stop-loss wins over everything else.
    handle.inbox.push(sample(6000, 31, 33, 64, 66));
    sleep(Duration::from_millis(700)).await;

    let closed = rig.tracker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, Some(ExitReason::StopLoss));
    // Sell at mid-1 = 31: (31 - 36 - 1) x 5.
    assert_eq!(closed[0].realized_pnl_cents, Some(-30));
    assert_eq!(rig.risk.total_exposure_cents(), 0);
}

/// S3: a loss past the daily cap trips the circuit; later signals are
/// refused for every market until reset.
#[tokio::test(start_paused = true)]
async fn s3_circuit_breaker_blocks_new_entries() {
    let mut cfg = test_config();
    cfg.max_daily_loss_cents = 25;
    cfg.cooldown_seconds = 0;
    let rig = Rig::new(cfg);
    let handle = rig.spawn("X");

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(6000, 31, 33, 64, 66));
    sleep(Duration::from_millis(700)).await;

    // -30c realized against a 25c daily cap.
    assert_eq!(rig.tracker.closed_trades().len(), 1);
    assert!(rig.risk.is_circuit_tripped());
    let orders_before = rig.exchange.placed_orders().len();

    // A fresh bullish setup now goes nowhere.
    handle.inbox.push(sample(11_000, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(16_000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;

    assert!(rig.tracker.open_trade("X").is_none());
    assert_eq!(rig.exchange.placed_orders().len(), orders_before);

    // Operator reset re-arms entries.
    rig.risk.reset_circuit();
    handle.inbox.push(sample(21_000, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(26_000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    assert!(rig.tracker.open_trade("X").is_some());
}

/// S5: a confident opposite signal exits the position and immediately
/// re-enters in the reversed direction.
#[tokio::test(start_paused = true)]
async fn s5_reversal_exit_and_reentry() {
    let mut cfg = test_config();
    // Wide protective stops so the reversal fires before the trailing stop.
    cfg.stop_loss_cents = 8;
    cfg.trailing_stop_cents = 6;
    cfg.cooldown_seconds = 0;
    let rig = Rig::new(cfg);
    let handle = rig.spawn("X");

    // gap 7c.
    handle.inbox.push(sample(0, 39, 41, 52, 54));
    sleep(Duration::from_millis(700)).await;
    // gap 4c, yes +5c: bullish, entry Buy Yes at 46.
    handle.inbox.push(sample(5000, 44, 46, 50, 52));
    sleep(Duration::from_millis(700)).await;
    let open = rig.tracker.open_trade("X").unwrap();
    assert_eq!(open.side, Side::Yes);
    assert_eq!(open.entry_price, 46);

    // gap 2c with yes -3c against the old window sample: bearish with full
    // confidence, above stops (stop 37, trailing 40).
    handle.inbox.push(sample(10_000, 41, 43, 55, 57));
    sleep(Duration::from_millis(700)).await;

    let closed = rig.tracker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, Some(ExitReason::Reversal));
    assert_eq!(closed[0].side, Side::Yes);

    // Fresh round trip on the No side, priced at no_mid+1 = 57.
    let reentry = rig.tracker.open_trade("X").expect("reversed entry");
    assert_eq!(reentry.side, Side::No);
    assert_eq!(reentry.entry_price, 57);
    assert_eq!(handle.phase.get(), Phase::Holding);
}

/// Resting entries resolve through the cancel race: not-found means the
/// order filled at its limit.
#[tokio::test(start_paused = true)]
async fn resting_entry_fills_via_cancel_race() {
    let mut cfg = test_config();
    cfg.cooldown_seconds = 0;
    let rig = Rig::new(cfg);
    let handle = rig.spawn("X");
    rig.exchange.set_resting(true);

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;

    // Order is resting: no position, but the reservation holds exposure.
    assert!(rig.tracker.open_trade("X").is_none());
    assert_eq!(rig.risk.total_exposure_cents(), 0);
    assert_eq!(handle.phase.get(), Phase::Flat);

    // The cancel after the ack timeout discovers the fill.
    rig.exchange.set_cancel_not_found(true);
    sleep(Duration::from_secs(6)).await;

    let open = rig.tracker.open_trade("X").expect("filled at limit");
    assert_eq!(open.entry_price, 36);
    assert_eq!(rig.risk.total_exposure_cents(), 180);
    assert_eq!(handle.phase.get(), Phase::Holding);
}

/// Resting entries that truly cancel release their reservation.
#[tokio::test(start_paused = true)]
async fn unfilled_entry_releases_reservation() {
    let mut cfg = test_config();
    cfg.cooldown_seconds = 0;
    let rig = Rig::new(cfg);
    let handle = rig.spawn("X");
    rig.exchange.set_resting(true);

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    sleep(Duration::from_secs(6)).await;

    assert!(rig.tracker.open_trade("X").is_none());
    assert_eq!(rig.risk.total_exposure_cents(), 0);
    assert_eq!(handle.phase.get(), Phase::Flat);

    // Fresh momentum fills once orders stop resting. Any still-pending
    // entry attempt first cycles through its own ack timeout.
    rig.exchange.set_resting(false);
    handle.inbox.push(sample(12_000, 29, 31, 59, 61));
    handle.inbox.push(sample(16_000, 34, 36, 57, 59));
    sleep(Duration::from_secs(7)).await;
    assert!(rig.tracker.open_trade("X").is_some());
}

/// Exits re-price after the order timeout until the position is gone.
#[tokio::test(start_paused = true)]
async fn exit_reprices_until_filled() {
    let rig = Rig::new(test_config());
    let handle = rig.spawn("X");

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    assert!(rig.tracker.open_trade("X").is_some());

    // Stop hit, but the sell only rests.
    rig.exchange.set_resting(true);
    handle.inbox.push(sample(6000, 31, 33, 64, 66));
    sleep(Duration::from_millis(700)).await;
    assert_eq!(handle.phase.get(), Phase::Exiting);

    // First timeout: cancel, re-submit (still resting).
    sleep(Duration::from_secs(11)).await;
    assert_eq!(handle.phase.get(), Phase::Exiting);

    // Second timeout: the cancel discovers a fill at the resting limit.
    rig.exchange.set_cancel_not_found(true);
    sleep(Duration::from_secs(11)).await;

    assert_eq!(handle.phase.get(), Phase::Flat);
    let closed = rig.tracker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(rig.risk.total_exposure_cents(), 0);

    let sells = rig
        .exchange
        .placed_orders()
        .into_iter()
        .filter(|o| o.action == OrderAction::Sell)
        .count();
    assert!(sells >= 2, "expected at least one re-priced exit, got {sells}");
}

/// Shutdown while holding: the position is exited with the Shutdown reason
/// and the trader retires.
#[tokio::test(start_paused = true)]
async fn shutdown_exits_open_positions() {
    let rig = Rig::new(test_config());
    let handle = rig.spawn("X");

    handle.inbox.push(sample(0, 29, 31, 59, 61));
    sleep(Duration::from_millis(700)).await;
    handle.inbox.push(sample(5000, 34, 36, 57, 59));
    sleep(Duration::from_millis(700)).await;
    assert_eq!(handle.phase.get(), Phase::Holding);

    rig.risk.begin_shutdown();
    rig.shutdown_tx.send(true).unwrap();
    sleep(Duration::from_millis(700)).await;

    assert!(rig.shared.is_empty());
    assert_eq!(handle.phase.get(), Phase::Retired);
    let closed = rig.tracker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, Some(ExitReason::Shutdown));
    assert_eq!(rig.risk.total_exposure_cents(), 0);
}

/// Discovery spawns traders for liquid markets (highest volume first under
/// the cap) and retires flat traders when liquidity dries up.
#[tokio::test(start_paused = true)]
async fn discovery_spawns_and_retires_by_liquidity() {
    let mut cfg = test_config();
    cfg.max_markets = 2;
    let mut rig = Rig::new(cfg.clone());

    let discovery = Discovery::new(
        cfg,
        rig.exchange.clone(),
        rig.router_tx.clone(),
        rig.deps(),
        rig.shutdown_tx.subscribe(),
    );

    let quote = |ticker: &str, bid: u8, ask: u8, volume: i64| MarketQuote {
        ticker: ticker.to_string(),
        yes_bid: Some(bid),
        yes_ask: Some(ask),
        no_bid: Some(100 - ask),
        no_ask: Some(100 - bid),
        volume,
    };

    discovery
        .scan(vec![
            quote("A", 40, 42, 100),
            quote("B", 30, 31, 500),
            // Spread too wide to trade.
            quote("C", 10, 40, 1000),
        ])
        .await;
    sleep(Duration::from_millis(100)).await;

    let mut running = rig.shared.tickers();
    running.sort();
    assert_eq!(running, vec!["A".to_string(), "B".to_string()]);

    // Highest volume attached first.
    let first = rig.router_rx.recv().await.unwrap();
    assert!(matches!(first, RouterCommand::Attach { ref ticker, .. } if ticker == "B"));
    let second = rig.router_rx.recv().await.unwrap();
    assert!(matches!(second, RouterCommand::Attach { ref ticker, .. } if ticker == "A"));

    // A dries up; its trader is flat, so it retires and detaches.
    discovery.scan(vec![quote("B", 30, 31, 500)]).await;
    sleep(Duration::from_millis(300)).await;

    assert_eq!(rig.shared.tickers(), vec!["B".to_string()]);
    let third = rig.router_rx.recv().await.unwrap();
    assert!(matches!(third, RouterCommand::Detach { ref ticker } if ticker == "A"));
}
