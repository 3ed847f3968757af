//! Property-based tests for the engine's quantified invariants:
//! exposure accounting, circuit-breaker stickiness, trailing-stop
//! monotonicity, history ordering and strategy determinism.

use proptest::prelude::*;

use kalshi_momentum::config::Config;
use kalshi_momentum::engine::signal;
use kalshi_momentum::ledger::TradeTracker;
use kalshi_momentum::risk::{RiskManager, RiskReject};
use kalshi_momentum::state::history::{HistoryEntry, PriceHistory};
use kalshi_momentum::state::position::Position;
use kalshi_momentum::types::{ExitReason, Side, TENTHS_PER_CENT};

fn base_config() -> Config {
    Config {
        api_key: "test".into(),
        cooldown_seconds: 0,
        max_position_per_market: 1000,
        ..Config::default()
    }
}

/// Generate a mid price in tenths, well inside the valid band.
fn mid_tenths_strategy() -> impl Strategy<Value = i64> {
    10i64..=990
}

fn entry_strategy() -> impl Strategy<Value = (i64, i64, i64)> {
    // (ts step, yes mid tenths, no mid tenths)
    (1i64..=2000, mid_tenths_strategy(), mid_tenths_strategy())
}

fn history_from(steps: &[(i64, i64, i64)]) -> PriceHistory {
    let mut h = PriceHistory::new(256);
    let mut ts = 0;
    for &(step, yes, no) in steps {
        ts += step;
        h.insert(HistoryEntry {
            ts_ms: ts,
            yes_mid_tenths: yes,
            no_mid_tenths: no,
            gap_tenths: 1000 - yes - no,
        });
    }
    h
}

proptest! {
    // P6: the signal is a deterministic pure function of its inputs.
    #[test]
    fn p6_signal_is_deterministic(
        steps in proptest::collection::vec(entry_strategy(), 0..40),
        window in 1i64..=30,
    ) {
        let mut cfg = base_config();
        cfg.momentum_window_seconds = window;

        let h = history_from(&steps);
        let t_now = h.latest().map(|e| e.ts_ms).unwrap_or(0);

        let a = signal::analyze(&h, t_now, &cfg);
        let b = signal::analyze(&h, t_now, &cfg);
        prop_assert_eq!(a, b);
    }

    // I6: history timestamps are strictly increasing regardless of input
    // ordering, and the buffer never exceeds its capacity.
    #[test]
    fn history_is_strictly_ordered_and_bounded(
        ts_list in proptest::collection::vec(0i64..=100_000, 0..200),
        capacity in 2usize..=64,
    ) {
        let mut h = PriceHistory::new(capacity);
        for ts in ts_list {
            h.insert(HistoryEntry {
                ts_ms: ts,
                yes_mid_tenths: 500,
                no_mid_tenths: 400,
                gap_tenths: 100,
            });
        }
        prop_assert!(h.len() <= capacity);
        if let Some(latest) = h.latest() {
            prop_assert!(h.window_at(latest.ts_ms, 1_000_000)
                .map(|(old, cur)| old.ts_ms < cur.ts_ms)
                .unwrap_or(true));
        }
    }

    // P3: for any sequence of mid updates, the high water mark never
    // decreases and the trailing stop tracks it at the configured distance.
    #[test]
    fn p3_trailing_stop_ratchets_monotonically(
        entry_price in 20u8..=80,
        mids in proptest::collection::vec(mid_tenths_strategy(), 0..100),
    ) {
        let trailing_cents = 2i64;
        // Deep stop so the trailing clamp never engages.
        let mut pos = Position::open(Side::Yes, 5, entry_price, 0, "oid".into(), 20, trailing_cents, 1);

        let mut prev_high = pos.highest_seen_tenths;
        for mid in mids {
            pos.ratchet(mid, trailing_cents);
            prop_assert!(pos.highest_seen_tenths >= prev_high);
            prop_assert_eq!(
                pos.trailing_stop_tenths,
                pos.highest_seen_tenths - trailing_cents * TENTHS_PER_CENT
            );
            prev_high = pos.highest_seen_tenths;
        }
    }

    // P2: at any quiescent point, committed exposure equals the sum of
    // size x entry_price over open positions.
    #[test]
    fn p2_exposure_matches_open_positions(
        ops in proptest::collection::vec(
            (1u32..=10, 1u8..=99, proptest::bool::ANY, proptest::bool::ANY),
            0..60,
        ),
    ) {
        let mut cfg = base_config();
        cfg.max_total_exposure_cents = 1_000_000;
        cfg.max_daily_loss_cents = i64::MAX / 4;
        let risk = RiskManager::from_config(&cfg);
        let now = tokio::time::Instant::now();

        // Model: the open lots we committed, per synthetic ticker.
        let mut open: Vec<(String, u32, u8)> = Vec::new();

        for (i, (size, price, commit, close_one)) in ops.into_iter().enumerate() {
            let ticker = format!("T{}", i % 7);
            if let Ok(res) = risk.check_and_reserve(&ticker, Side::Yes, size, price, now) {
                if commit {
                    risk.commit_entry(res, size, price, now);
                    open.push((ticker.clone(), size, price));
                } else {
                    risk.release(res);
                }
            }
            if close_one && !open.is_empty() {
                let (t, s, p) = open.remove(0);
                risk.commit_exit(&t, -1, s, p);
            }

            let model: i64 = open.iter().map(|(_, s, p)| *s as i64 * *p as i64).sum();
            prop_assert_eq!(risk.total_exposure_cents(), model);
        }
    }

    // P4: once the circuit trips, no reservation succeeds until reset.
    #[test]
    fn p4_tripped_circuit_refuses_everything(
        attempts in proptest::collection::vec((1u32..=10, 1u8..=99), 1..30),
    ) {
        let mut cfg = base_config();
        cfg.max_daily_loss_cents = 10;
        let risk = RiskManager::from_config(&cfg);
        let now = tokio::time::Instant::now();

        let res = risk.check_and_reserve("T", Side::Yes, 1, 50, now).unwrap();
        risk.commit_entry(res, 1, 50, now);
        risk.commit_exit("T", -50, 1, 50);
        prop_assert!(risk.is_circuit_tripped());

        for (ticker_idx, (size, price)) in attempts.iter().enumerate() {
            let ticker = format!("T{}", ticker_idx % 5);
            prop_assert_eq!(
                risk.check_and_reserve(&ticker, Side::Yes, *size, *price, now),
                Err(RiskReject::CircuitTripped)
            );
        }

        risk.reset_circuit();
        prop_assert!(risk.check_and_reserve("T", Side::Yes, 1, 50, now).is_ok());
    }

    // P1/P5: the ledger never holds two concurrent open round trips for a
    // ticker, and every exit closes the matching entry.
    #[test]
    fn p1_p5_one_round_trip_open_per_ticker(
        ops in proptest::collection::vec((0usize..3, proptest::bool::ANY), 0..80),
    ) {
        let tracker = TradeTracker::new(None);
        let tickers = ["A", "B", "C"];
        let mut model_open = [false; 3];
        let mut expected_closed = 0usize;

        for (idx, enter) in ops {
            let ticker = tickers[idx];
            if enter {
                tracker.record_entry(ticker, Side::Yes, 1, 50, 0);
                model_open[idx] = true;
            } else if model_open[idx] {
                tracker.record_exit(ticker, 51, 1, ExitReason::TrailingStop, 0);
                model_open[idx] = false;
                expected_closed += 1;
            } else {
                // Exit with nothing open is ignored.
                tracker.record_exit(ticker, 51, 1, ExitReason::TrailingStop, 0);
            }

            let snap = tracker.snapshot();
            let model_open_count = model_open.iter().filter(|b| **b).count();
            prop_assert_eq!(snap.open_positions, model_open_count);
            prop_assert_eq!(tracker.closed_trades().len(), expected_closed);
        }
    }
}
