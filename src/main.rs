use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kalshi_rs::auth::Account;
use kalshi_rs::{KalshiClient, KalshiWebsocketClient};

use kalshi_momentum::config::{Config, ExecMode};
use kalshi_momentum::discovery::Discovery;
use kalshi_momentum::engine::trader::TraderDeps;
use kalshi_momentum::exec::http::KalshiExchange;
use kalshi_momentum::exec::paper::PaperExchange;
use kalshi_momentum::exec::ExchangeApi;
use kalshi_momentum::feed::kalshi::KalshiFeed;
use kalshi_momentum::feed::task::{run_router, RouterCommand};
use kalshi_momentum::ledger::{JsonlSink, TradeSink, TradeTracker};
use kalshi_momentum::report;
use kalshi_momentum::risk::RiskManager;
use kalshi_momentum::state::Shared;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_FEED: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    dotenv().ok();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cfg = Config::from_env();
    if let Err(e) = cfg.validate() {
        error!("configuration error: {e}");
        return EXIT_CONFIG;
    }

    let account = match Account::from_file(&cfg.private_key_path, cfg.api_key.as_str()) {
        Ok(a) => a,
        Err(e) => {
            error!(path = %cfg.private_key_path, "failed to load credentials: {e}");
            return EXIT_CONFIG;
        }
    };

    let exchange: Arc<dyn ExchangeApi> = match cfg.exec_mode {
        ExecMode::Live => {
            let client = Arc::new(KalshiClient::new_with_config(
                account.clone(),
                KalshiExchange::base_url(cfg.use_demo),
            ));
            Arc::new(KalshiExchange::new(client))
        }
        ExecMode::Paper => {
            info!("paper execution mode: orders fill in memory");
            Arc::new(PaperExchange::new())
        }
    };

    // Fail fast on broken auth, and log what we are working with.
    match exchange.get_balance().await {
        Ok(balance_cents) => info!(balance_cents, "exchange reachable"),
        Err(e) => {
            error!("balance check failed: {e}");
            return EXIT_CONFIG;
        }
    }

    let sink: Option<Box<dyn TradeSink>> = match &cfg.trade_log_path {
        Some(path) => match JsonlSink::open(Path::new(path)) {
            Ok(s) => Some(Box::new(s)),
            Err(e) => {
                error!("cannot open trade log: {e}");
                return EXIT_CONFIG;
            }
        },
        None => None,
    };

    let risk = Arc::new(RiskManager::from_config(&cfg));
    let tracker = Arc::new(TradeTracker::new(sink));
    let shared = Shared::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (router_tx, router_rx) = mpsc::channel::<RouterCommand>(64);

    let feed = KalshiFeed::new(KalshiWebsocketClient::new(account));
    let mut router_handle = tokio::spawn(run_router(
        Box::new(feed),
        router_rx,
        cfg.subscribe_debounce_ms,
    ));

    let deps = TraderDeps {
        risk: risk.clone(),
        tracker: tracker.clone(),
        exchange: exchange.clone(),
        shared: shared.clone(),
        router_tx: router_tx.clone(),
        shutdown: shutdown_rx.clone(),
    };

    tokio::spawn(
        Discovery::new(
            cfg.clone(),
            exchange.clone(),
            router_tx.clone(),
            deps,
            shutdown_rx.clone(),
        )
        .run(),
    );

    tokio::spawn(report::run_reporter(
        cfg.status_interval_secs,
        shared.clone(),
        risk.clone(),
        tracker.clone(),
        shutdown_rx.clone(),
    ));

    info!(exec_mode = ?cfg.exec_mode, max_markets = cfg.max_markets, "engine running");

    let feed_failed = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            false
        }
        res = &mut router_handle => {
            match res {
                Ok(Ok(())) => info!("feed router stopped"),
                Ok(Err(e)) => error!("unrecoverable feed error: {e}"),
                Err(e) => error!("feed router panicked: {e}"),
            }
            true
        }
    };

    // No new entries from here; holding traders exit, flat traders retire.
    risk.begin_shutdown();
    let _ = shutdown_tx.send(true);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cfg.shutdown_grace_secs);
    while !shared.is_empty() && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(200)).await;
    }
    if !shared.is_empty() {
        warn!(
            remaining = ?shared.tickers(),
            "shutdown grace elapsed; abandoning open positions"
        );
    }

    router_handle.abort();

    let snap = tracker.snapshot();
    info!(
        wins = snap.wins,
        losses = snap.losses,
        realized_pnl_cents = snap.realized_pnl_cents,
        "engine stopped"
    );

    if feed_failed { EXIT_FEED } else { EXIT_OK }
}
