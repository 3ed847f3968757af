use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::types::Side;

/// Why an entry was refused. Non-fatal: the trader skips the opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RiskReject {
    #[error("daily-loss circuit breaker is tripped")]
    CircuitTripped,
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error("per-market position limit reached")]
    PositionLimit,
    #[error("total exposure cap reached")]
    ExposureCap,
    #[error("market cooldown active")]
    Cooldown,
}

/// Pending commitment of exposure between trade decision and order ack.
/// Consumed by `commit_entry` or `release`; swept if the ack never comes.
#[derive(Debug)]
pub struct Reservation {
    pub id: Uuid,
    pub ticker: String,
    pub side: Side,
    pub size: u32,
    pub price: u8,
}

impl Reservation {
    pub fn exposure_cents(&self) -> i64 {
        self.size as i64 * self.price as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingReservation {
    exposure_cents: i64,
    created_at: Instant,
}

#[derive(Debug, Default)]
struct RiskState {
    total_exposure_cents: i64,
    pending_exposure_cents: i64,
    realized_pnl_today_cents: i64,
    open_size: HashMap<String, u32>,
    last_trade_at: HashMap<String, Instant>,
    pending: HashMap<Uuid, PendingReservation>,
    rejects: u64,
    circuit_tripped: bool,
    shutting_down: bool,
}

/// Shared gatekeeper for entries. One mutex serializes every decision; it is
/// never held across I/O.
#[derive(Debug)]
pub struct RiskManager {
    max_position_per_market: u32,
    max_total_exposure_cents: i64,
    max_daily_loss_cents: i64,
    cooldown: Duration,
    ack_timeout: Duration,
    inner: Mutex<RiskState>,
}

impl RiskManager {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_position_per_market: cfg.max_position_per_market,
            max_total_exposure_cents: cfg.max_total_exposure_cents,
            max_daily_loss_cents: cfg.max_daily_loss_cents,
            cooldown: Duration::from_secs(cfg.cooldown_seconds),
            ack_timeout: Duration::from_secs(cfg.order_ack_timeout_secs),
            inner: Mutex::new(RiskState::default()),
        }
    }

    /// Atomically verify circuit, per-market size, exposure cap (open plus
    /// pending) and cooldown, then hold the intended exposure as pending.
    pub fn check_and_reserve(
        &self,
        ticker: &str,
        side: Side,
        size: u32,
        price: u8,
        now: Instant,
    ) -> Result<Reservation, RiskReject> {
        let mut st = self.inner.lock().expect("risk lock poisoned");

        // Reservations whose ack never arrived expire here.
        let ack_timeout = self.ack_timeout;
        st.pending
            .retain(|_, p| now.duration_since(p.created_at) < ack_timeout);
        let pending_total: i64 = st.pending.values().map(|p| p.exposure_cents).sum();
        st.pending_exposure_cents = pending_total;

        if let Err(reason) = self.admit(&st, ticker, size, price, now) {
            st.rejects += 1;
            return Err(reason);
        }

        let res = Reservation {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            side,
            size,
            price,
        };
        st.pending.insert(
            res.id,
            PendingReservation {
                exposure_cents: res.exposure_cents(),
                created_at: now,
            },
        );
        st.pending_exposure_cents += res.exposure_cents();
        Ok(res)
    }

    fn admit(
        &self,
        st: &RiskState,
        ticker: &str,
        size: u32,
        price: u8,
        now: Instant,
    ) -> Result<(), RiskReject> {
        if st.circuit_tripped {
            return Err(RiskReject::CircuitTripped);
        }
        if st.shutting_down {
            return Err(RiskReject::ShuttingDown);
        }
        let open = st.open_size.get(ticker).copied().unwrap_or(0);
        if open + size > self.max_position_per_market {
            return Err(RiskReject::PositionLimit);
        }
        let intended = size as i64 * price as i64;
        if st.total_exposure_cents + st.pending_exposure_cents + intended
            > self.max_total_exposure_cents
        {
            return Err(RiskReject::ExposureCap);
        }
        if let Some(&last) = st.last_trade_at.get(ticker) {
            if now.duration_since(last) < self.cooldown {
                return Err(RiskReject::Cooldown);
            }
        }
        Ok(())
    }

    /// Finalize a reservation at the exposure actually filled. Partial fills
    /// commit less than was reserved.
    pub fn commit_entry(&self, res: Reservation, filled_size: u32, fill_price: u8, now: Instant) {
        let mut st = self.inner.lock().expect("risk lock poisoned");
        if let Some(p) = st.pending.remove(&res.id) {
            st.pending_exposure_cents -= p.exposure_cents;
        }
        st.total_exposure_cents += filled_size as i64 * fill_price as i64;
        *st.open_size.entry(res.ticker.clone()).or_insert(0) += filled_size;
        st.last_trade_at.insert(res.ticker, now);
    }

    /// Undo a reservation after a rejected or unacked order.
    pub fn release(&self, res: Reservation) {
        let mut st = self.inner.lock().expect("risk lock poisoned");
        if let Some(p) = st.pending.remove(&res.id) {
            st.pending_exposure_cents -= p.exposure_cents;
        }
    }

    /// Book a closed round trip. Exits are always admitted, even tripped or
    /// shutting down.
    pub fn commit_exit(&self, ticker: &str, realized_pnl_cents: i64, size: u32, entry_price: u8) {
        let mut st = self.inner.lock().expect("risk lock poisoned");
        st.total_exposure_cents -= size as i64 * entry_price as i64;
        if let Some(open) = st.open_size.get_mut(ticker) {
            *open = open.saturating_sub(size);
            if *open == 0 {
                st.open_size.remove(ticker);
            }
        }
        st.realized_pnl_today_cents += realized_pnl_cents;

        if !st.circuit_tripped && st.realized_pnl_today_cents <= -self.max_daily_loss_cents {
            st.circuit_tripped = true;
            warn!(
                realized_pnl_cents = st.realized_pnl_today_cents,
                max_daily_loss_cents = self.max_daily_loss_cents,
                "daily-loss circuit breaker tripped; no new entries until reset"
            );
        }
    }

    pub fn is_circuit_tripped(&self) -> bool {
        self.inner.lock().expect("risk lock poisoned").circuit_tripped
    }

    /// Operator reset of the circuit breaker.
    pub fn reset_circuit(&self) {
        let mut st = self.inner.lock().expect("risk lock poisoned");
        if st.circuit_tripped {
            st.circuit_tripped = false;
            info!("circuit breaker reset");
        }
    }

    /// Refuse all new reservations from now on; exits continue.
    pub fn begin_shutdown(&self) {
        self.inner.lock().expect("risk lock poisoned").shutting_down = true;
    }

    pub fn total_exposure_cents(&self) -> i64 {
        self.inner.lock().expect("risk lock poisoned").total_exposure_cents
    }

    pub fn realized_pnl_today_cents(&self) -> i64 {
        self.inner
            .lock()
            .expect("risk lock poisoned")
            .realized_pnl_today_cents
    }

    pub fn reject_count(&self) -> u64 {
        self.inner.lock().expect("risk lock poisoned").rejects
    }
}
