use std::env;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Live,
    Paper,
}

impl ExecMode {
    pub fn is_paper(self) -> bool {
        matches!(self, ExecMode::Paper)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub exec_mode: ExecMode,

    // Credentials for the live REST/websocket clients.
    pub api_key: String,
    pub private_key_path: String,
    pub use_demo: bool,

    // JSON-lines trade log; None disables persistence.
    pub trade_log_path: Option<String>,

    // Discovery: what counts as a liquid market.
    pub min_volume: i64, // 0 disables the volume filter
    pub max_spread_cents: i64,
    pub max_markets: usize,
    pub market_scan_interval_secs: u64,

    // Momentum strategy.
    pub momentum_window_seconds: i64,
    pub entry_threshold_cents: i64,
    pub convergence_threshold_pct: i64,

    // Entries and exits.
    pub order_size: u32,
    pub stop_loss_cents: i64,
    pub trailing_stop_cents: i64,
    pub kalshi_fee_cents: i64,

    // Risk caps.
    pub max_position_per_market: u32,
    pub max_total_exposure_cents: i64,
    pub max_daily_loss_cents: i64,
    pub cooldown_seconds: u64,

    // Engine cadence and timeouts.
    pub tick_ms: u64,
    pub strategy_cadence_ms: u64,
    pub order_ack_timeout_secs: u64,
    pub order_timeout_secs: u64,
    pub shutdown_grace_secs: u64,

    // Plumbing.
    pub inbox_capacity: usize,
    pub subscribe_debounce_ms: u64,
    pub reversal_confidence: f64,
    pub status_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exec_mode: ExecMode::Live,

            api_key: String::new(),
            private_key_path: "./private_keys/kalshi_private.pem".to_string(),
            use_demo: false,

            trade_log_path: Some("trades.jsonl".to_string()),

            min_volume: 0,
            max_spread_cents: 5,
            max_markets: 20,
            market_scan_interval_secs: 60,

            momentum_window_seconds: 5,
            entry_threshold_cents: 2,
            convergence_threshold_pct: 3,

            order_size: 5,
            stop_loss_cents: 2,
            trailing_stop_cents: 2,
            kalshi_fee_cents: 1,

            max_position_per_market: 10,
            max_total_exposure_cents: 10_000,
            max_daily_loss_cents: 2_500,
            cooldown_seconds: 30,

            tick_ms: 200,
            strategy_cadence_ms: 500,
            order_ack_timeout_secs: 5,
            order_timeout_secs: 10,
            shutdown_grace_secs: 30,

            inbox_capacity: 1024,
            subscribe_debounce_ms: 200,
            reversal_confidence: 0.5,
            status_interval_secs: 30,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, into: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *into = parsed;
        }
    }
}

impl Config {
    /// Defaults overridden by environment variables (a `.env` file is loaded
    /// by the caller before this runs).
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("API_KEY") {
            cfg.api_key = v;
        }
        if let Ok(v) = env::var("PRIVATE_KEY_PATH") {
            cfg.private_key_path = v;
        }
        if let Ok(v) = env::var("USE_DEMO") {
            cfg.use_demo = v == "true" || v == "1";
        }
        if let Ok(v) = env::var("EXEC_MODE") {
            if v.eq_ignore_ascii_case("paper") {
                cfg.exec_mode = ExecMode::Paper;
            }
        }
        if let Ok(v) = env::var("TRADE_LOG_PATH") {
            cfg.trade_log_path = if v.is_empty() { None } else { Some(v) };
        }

        env_parse("MIN_VOLUME", &mut cfg.min_volume);
        env_parse("MAX_SPREAD", &mut cfg.max_spread_cents);
        env_parse("MAX_MARKETS", &mut cfg.max_markets);
        env_parse("MARKET_SCAN_INTERVAL", &mut cfg.market_scan_interval_secs);
        env_parse("MOMENTUM_WINDOW_SECONDS", &mut cfg.momentum_window_seconds);
        env_parse("ENTRY_THRESHOLD_CENTS", &mut cfg.entry_threshold_cents);
        env_parse("CONVERGENCE_THRESHOLD_PCT", &mut cfg.convergence_threshold_pct);
        env_parse("ORDER_SIZE", &mut cfg.order_size);
        env_parse("STOP_LOSS_CENTS", &mut cfg.stop_loss_cents);
        env_parse("TRAILING_STOP_CENTS", &mut cfg.trailing_stop_cents);
        env_parse("KALSHI_FEE_CENTS", &mut cfg.kalshi_fee_cents);
        env_parse("MAX_POSITION_PER_MARKET", &mut cfg.max_position_per_market);
        env_parse("MAX_TOTAL_EXPOSURE", &mut cfg.max_total_exposure_cents);
        env_parse("MAX_DAILY_LOSS", &mut cfg.max_daily_loss_cents);
        env_parse("COOLDOWN_SECONDS", &mut cfg.cooldown_seconds);

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        // Even paper mode consumes the authenticated market-data feed.
        anyhow::ensure!(!self.api_key.is_empty(), "API_KEY must be set");
        anyhow::ensure!(!self.private_key_path.is_empty(), "PRIVATE_KEY_PATH must be set");
        anyhow::ensure!(self.order_size >= 1, "order_size must be at least 1");
        anyhow::ensure!(
            self.order_size <= self.max_position_per_market,
            "order_size {} exceeds max_position_per_market {}",
            self.order_size,
            self.max_position_per_market
        );
        anyhow::ensure!(
            self.momentum_window_seconds >= 1,
            "momentum_window_seconds must be at least 1"
        );
        anyhow::ensure!(
            self.convergence_threshold_pct >= 1,
            "convergence_threshold_pct must be at least 1"
        );
        anyhow::ensure!(self.entry_threshold_cents >= 0, "entry_threshold_cents must be >= 0");
        anyhow::ensure!(self.stop_loss_cents >= 1, "stop_loss_cents must be at least 1");
        anyhow::ensure!(self.trailing_stop_cents >= 1, "trailing_stop_cents must be at least 1");
        anyhow::ensure!(self.kalshi_fee_cents >= 0, "kalshi_fee_cents must be >= 0");
        anyhow::ensure!(
            (1..=99).contains(&self.max_spread_cents),
            "max_spread must be between 1 and 99 cents"
        );
        anyhow::ensure!(
            self.max_total_exposure_cents > 0,
            "max_total_exposure must be positive"
        );
        anyhow::ensure!(self.max_daily_loss_cents > 0, "max_daily_loss must be positive");
        anyhow::ensure!(self.max_markets >= 1, "max_markets must be at least 1");
        anyhow::ensure!(self.tick_ms >= 10, "tick_ms must be at least 10");
        anyhow::ensure!(
            self.strategy_cadence_ms >= self.tick_ms,
            "strategy_cadence_ms must be >= tick_ms"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.reversal_confidence),
            "reversal_confidence must be within [0, 1]"
        );
        anyhow::ensure!(self.inbox_capacity >= 1, "inbox_capacity must be at least 1");
        Ok(())
    }
}
