use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::info;

use crate::ledger::TradeTracker;
use crate::risk::RiskManager;
use crate::state::Shared;

/// Periodic engine status line.
pub async fn run_reporter(
    interval_secs: u64,
    shared: Shared,
    risk: Arc<RiskManager>,
    tracker: Arc<TradeTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        let snap = tracker.snapshot();
        info!(
            traders = shared.len(),
            open_positions = snap.open_positions,
            wins = snap.wins,
            losses = snap.losses,
            realized_pnl_cents = snap.realized_pnl_cents,
            exposure_cents = risk.total_exposure_cents(),
            circuit_tripped = risk.is_circuit_tripped(),
            risk_rejects = risk.reject_count(),
            "engine status"
        );
    }
}
