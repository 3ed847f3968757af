use crate::config::Config;
use crate::state::history::PriceHistory;
use crate::types::{Signal, SignalKind, TENTHS_PER_CENT};

/// Momentum over a gap-convergence window.
///
/// Pure function of the history: same inputs, same signal. Convergence is a
/// shrinking gap; a directional yes-mid move alongside it is momentum. The
/// convergence threshold is strict, so a shrink exactly at the threshold
/// does not fire.
pub fn analyze(history: &PriceHistory, t_now_ms: i64, cfg: &Config) -> Signal {
    let Some((old, cur)) = history.window_at(t_now_ms, cfg.momentum_window_seconds) else {
        return Signal::neutral();
    };

    let gap_change = cur.gap_tenths - old.gap_tenths;
    let yes_change = cur.yes_mid_tenths - old.yes_mid_tenths;

    let denom = old.gap_tenths.abs().max(1);
    let gap_shrink_pct = -(gap_change as f64) * 100.0 / denom as f64;

    let threshold = cfg.convergence_threshold_pct as f64;
    let entry_tenths = cfg.entry_threshold_cents * TENTHS_PER_CENT;

    let converging = gap_shrink_pct > threshold;
    let bullish = converging && yes_change >= entry_tenths;
    let bearish = converging && yes_change <= -entry_tenths;

    // Zero-threshold configs can satisfy both directions at once; that is
    // noise, not momentum.
    let kind = match (bullish, bearish) {
        (true, true) | (false, false) => SignalKind::Neutral,
        (true, false) => SignalKind::Bullish,
        (false, true) => SignalKind::Bearish,
    };

    let confidence = match kind {
        SignalKind::Neutral => 0.0,
        _ => (gap_shrink_pct / (2.0 * threshold)).min(1.0),
    };

    Signal {
        kind,
        confidence,
        gap_change_tenths: gap_change,
        yes_change_tenths: yes_change,
    }
}
