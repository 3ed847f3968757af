use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::signal;
use crate::exec::{AckStatus, CancelOutcome, ExchangeApi, OrderAction};
use crate::feed::task::RouterCommand;
use crate::ledger::{round_trip_pnl_cents, TradeTracker};
use crate::risk::{Reservation, RiskManager};
use crate::state::history::{HistoryEntry, PriceHistory};
use crate::state::position::Position;
use crate::state::{Inbox, Phase, PhaseCell, Shared, TraderHandle};
use crate::types::{ExitReason, Sample, Side, TENTHS_PER_CENT};

/// Shared services every trader runs against.
#[derive(Clone)]
pub struct TraderDeps {
    pub risk: Arc<RiskManager>,
    pub tracker: Arc<TradeTracker>,
    pub exchange: Arc<dyn ExchangeApi>,
    pub shared: Shared,
    pub router_tx: mpsc::Sender<RouterCommand>,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug)]
struct ExitState {
    reason: ExitReason,
    order_id: Option<String>,
    limit_price: u8,
    submitted_at: Instant,
    pnl_accrued_cents: i64,
    last_fill_price: u8,
}

#[derive(Debug)]
enum TraderState {
    Flat,
    /// Entry order resting on the exchange; the reservation is held until
    /// the ack race resolves.
    AwaitingEntry {
        reservation: Reservation,
        order_id: String,
        side: Side,
        size: u32,
        limit_price: u8,
        submitted_at: Instant,
    },
    Holding,
    Exiting(ExitState),
}

/// Per-market worker. Owns one position and the entry/exit state machine;
/// suspends on its sample inbox and a periodic tick.
pub struct MarketTrader {
    ticker: String,
    cfg: Config,

    risk: Arc<RiskManager>,
    tracker: Arc<TradeTracker>,
    exchange: Arc<dyn ExchangeApi>,
    shared: Shared,
    router_tx: mpsc::Sender<RouterCommand>,
    shutdown: watch::Receiver<bool>,

    inbox: Arc<Inbox>,
    phase: Arc<PhaseCell>,
    retire: Arc<Notify>,

    history: PriceHistory,
    last_sample: Option<Sample>,
    position: Option<Position>,
    state: TraderState,
    last_analysis: Option<Instant>,
    reversal_hint: Option<Side>,
    shutting_down: bool,
}

/// Spawn a trader task and register its handle in the shared registry.
pub fn spawn(cfg: Config, ticker: String, deps: TraderDeps) -> TraderHandle {
    let inbox = Arc::new(Inbox::new(cfg.inbox_capacity));
    let phase = Arc::new(PhaseCell::default());
    let retire = Arc::new(Notify::new());

    let handle = TraderHandle {
        ticker: ticker.clone(),
        inbox: inbox.clone(),
        phase: phase.clone(),
        retire: retire.clone(),
    };
    deps.shared.insert(handle.clone());

    let trader = MarketTrader {
        history: PriceHistory::for_window(cfg.momentum_window_seconds),
        ticker,
        cfg,
        risk: deps.risk,
        tracker: deps.tracker,
        exchange: deps.exchange,
        shared: deps.shared,
        router_tx: deps.router_tx,
        shutdown: deps.shutdown,
        inbox,
        phase,
        retire,
        last_sample: None,
        position: None,
        state: TraderState::Flat,
        last_analysis: None,
        reversal_hint: None,
        shutting_down: false,
    };
    tokio::spawn(trader.run());
    handle
}

impl MarketTrader {
    pub async fn run(mut self) {
        let mut tick = time::interval(Duration::from_millis(self.cfg.tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(ticker = %self.ticker, "trader started");

        loop {
            tokio::select! {
                _ = self.inbox.notify.notified() => {
                    for sample in self.inbox.drain() {
                        self.on_sample(sample);
                    }
                }

                _ = tick.tick() => {
                    // Errors inside a tick abandon the opportunity, never
                    // the trader.
                    if let Err(e) = self.on_tick().await {
                        warn!(ticker = %self.ticker, error = %e, "tick failed");
                    }
                }

                _ = self.retire.notified() => {
                    if matches!(self.state, TraderState::Flat) && self.position.is_none() {
                        info!(ticker = %self.ticker, "retiring");
                        break;
                    }
                    debug!(ticker = %self.ticker, "retire deferred; round trip in flight");
                }

                res = self.shutdown.changed(), if !self.shutting_down => {
                    if res.is_err() || *self.shutdown.borrow() {
                        self.begin_shutdown().await;
                    }
                }
            }

            if self.shutting_down && matches!(self.state, TraderState::Flat) {
                break;
            }
        }

        self.phase.set(Phase::Retired);
        self.shared.remove(&self.ticker);
        let _ = self
            .router_tx
            .send(RouterCommand::Detach {
                ticker: self.ticker.clone(),
            })
            .await;
        info!(ticker = %self.ticker, "trader stopped");
    }

    fn on_sample(&mut self, sample: Sample) {
        if let (Some(yes), Some(no), Some(gap)) = (
            sample.yes_mid_tenths(),
            sample.no_mid_tenths(),
            sample.gap_tenths(),
        ) {
            self.history.insert(HistoryEntry {
                ts_ms: sample.ts_ms,
                yes_mid_tenths: yes,
                no_mid_tenths: no,
                gap_tenths: gap,
            });
        }
        self.last_sample = Some(sample);

        // Ratchet on price updates while holding; frozen once exiting.
        if matches!(self.state, TraderState::Holding) {
            if let Some(pos) = self.position.as_mut() {
                if let Some(mid) = sample.side_mid_tenths(pos.side) {
                    pos.ratchet(mid, self.cfg.trailing_stop_cents);
                }
            }
        }
    }

    async fn on_tick(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.state {
            TraderState::Flat => {
                if !self.shutting_down && self.strategy_due(now) {
                    self.try_enter(now, None).await?;
                }
            }
            TraderState::AwaitingEntry { .. } => self.poll_entry(now).await?,
            TraderState::Holding => self.holding_tick(now).await?,
            TraderState::Exiting(_) => self.poll_exit(now).await?,
        }
        Ok(())
    }

    fn strategy_due(&mut self, now: Instant) -> bool {
        let cadence = Duration::from_millis(self.cfg.strategy_cadence_ms);
        let due = self
            .last_analysis
            .is_none_or(|t| now.duration_since(t) >= cadence);
        if due {
            self.last_analysis = Some(now);
        }
        due
    }

    fn analysis_now_ms(&self) -> Option<i64> {
        // The signal is a pure function of feed data: evaluate the window at
        // the newest sample's timestamp, not at wall clock.
        self.history.latest().map(|e| e.ts_ms)
    }

    async fn try_enter(&mut self, now: Instant, forced_side: Option<Side>) -> Result<()> {
        let Some(sample) = self.last_sample else {
            return Ok(());
        };

        let side = match forced_side {
            Some(side) => side,
            None => {
                let Some(t_now) = self.analysis_now_ms() else {
                    return Ok(());
                };
                let sig = signal::analyze(&self.history, t_now, &self.cfg);
                let Some(side) = sig.entry_side() else {
                    return Ok(());
                };
                debug!(
                    ticker = %self.ticker,
                    kind = ?sig.kind,
                    confidence = sig.confidence,
                    gap_change_tenths = sig.gap_change_tenths,
                    yes_change_tenths = sig.yes_change_tenths,
                    "momentum signal"
                );
                side
            }
        };

        // No entries into an illiquid book.
        let (bid, ask) = match side {
            Side::Yes => (sample.yes_bid, sample.yes_ask),
            Side::No => (sample.no_bid, sample.no_ask),
        };
        let Some(ask) = ask else {
            return Ok(());
        };
        if let Some(bid) = bid {
            if ask as i64 - bid as i64 > self.cfg.max_spread_cents {
                return Ok(());
            }
        }
        let Some(mid) = sample.side_mid_tenths(side) else {
            return Ok(());
        };
        let limit_price = ((mid / TENTHS_PER_CENT) + 1).clamp(1, 99) as u8;
        let size = self.cfg.order_size;

        let reservation = match self
            .risk
            .check_and_reserve(&self.ticker, side, size, limit_price, now)
        {
            Ok(r) => r,
            Err(reason) => {
                debug!(ticker = %self.ticker, %reason, "entry refused");
                return Ok(());
            }
        };

        let ack = match self
            .exchange
            .place_order(
                &self.ticker,
                side,
                OrderAction::Buy,
                limit_price,
                size,
                Uuid::new_v4(),
            )
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                self.risk.release(reservation);
                warn!(ticker = %self.ticker, error = %e, "entry submit failed");
                return Ok(());
            }
        };

        match ack.status {
            AckStatus::Filled | AckStatus::PartiallyFilled if ack.filled_qty > 0 => {
                // Residual of a partial fill is cancelled; the reservation
                // commits at the filled quantity only.
                if ack.filled_qty < size {
                    let _ = self.exchange.cancel_order(&ack.order_id).await;
                }
                let fill_price = ack.avg_fill_price.unwrap_or(limit_price);
                self.open_position(reservation, side, ack.filled_qty, fill_price, ack.order_id, now);
            }
            AckStatus::Resting => {
                self.state = TraderState::AwaitingEntry {
                    reservation,
                    order_id: ack.order_id,
                    side,
                    size,
                    limit_price,
                    submitted_at: now,
                };
            }
            _ => {
                self.risk.release(reservation);
            }
        }
        Ok(())
    }

    fn open_position(
        &mut self,
        reservation: Reservation,
        side: Side,
        filled: u32,
        fill_price: u8,
        order_id: String,
        now: Instant,
    ) {
        let opened_at_ms = self.last_sample.map(|s| s.ts_ms).unwrap_or_default();
        self.risk.commit_entry(reservation, filled, fill_price, now);
        self.tracker
            .record_entry(&self.ticker, side, filled, fill_price, opened_at_ms);

        let pos = Position::open(
            side,
            filled,
            fill_price,
            opened_at_ms,
            order_id,
            self.cfg.stop_loss_cents,
            self.cfg.trailing_stop_cents,
            self.cfg.kalshi_fee_cents,
        );
        info!(
            ticker = %self.ticker,
            side = side.as_str(),
            size = filled,
            entry_price = fill_price,
            stop_loss_tenths = pos.stop_loss_tenths,
            trailing_stop_tenths = pos.trailing_stop_tenths,
            "entered position"
        );
        self.position = Some(pos);
        self.state = TraderState::Holding;
        self.phase.set(Phase::Holding);
    }

    async fn poll_entry(&mut self, now: Instant) -> Result<()> {
        match std::mem::replace(&mut self.state, TraderState::Flat) {
            TraderState::AwaitingEntry {
                reservation,
                order_id,
                side,
                size,
                limit_price,
                submitted_at,
            } => {
                let ack_timeout = Duration::from_secs(self.cfg.order_ack_timeout_secs);
                if now.duration_since(submitted_at) < ack_timeout {
                    self.state = TraderState::AwaitingEntry {
                        reservation,
                        order_id,
                        side,
                        size,
                        limit_price,
                        submitted_at,
                    };
                    return Ok(());
                }

                match self.exchange.cancel_order(&order_id).await {
                    Ok(CancelOutcome::Canceled) => {
                        debug!(ticker = %self.ticker, "entry unfilled within ack timeout; cancelled");
                        self.risk.release(reservation);
                    }
                    Ok(CancelOutcome::NotFound) => {
                        // Filled before the cancel landed: book it at the
                        // submitted limit.
                        self.open_position(reservation, side, size, limit_price, order_id, now);
                    }
                    Err(e) => {
                        warn!(ticker = %self.ticker, error = %e, "entry cancel failed; retrying");
                        self.state = TraderState::AwaitingEntry {
                            reservation,
                            order_id,
                            side,
                            size,
                            limit_price,
                            submitted_at,
                        };
                    }
                }
            }
            other => self.state = other,
        }
        Ok(())
    }

    async fn holding_tick(&mut self, now: Instant) -> Result<()> {
        let Some(sample) = self.last_sample else {
            return Ok(());
        };

        let (mid, stop, trail, held) = {
            let Some(pos) = self.position.as_mut() else {
                return Ok(());
            };
            // Best-effort while the held side has no quotes: hold on.
            let Some(mid) = sample.side_mid_tenths(pos.side) else {
                return Ok(());
            };
            pos.ratchet(mid, self.cfg.trailing_stop_cents);
            (mid, pos.stop_loss_tenths, pos.trailing_stop_tenths, pos.side)
        };

        if mid <= stop {
            return self.begin_exit(ExitReason::StopLoss, now).await;
        }
        if mid <= trail {
            return self.begin_exit(ExitReason::TrailingStop, now).await;
        }

        // Reversal is only evaluated on the strategy cadence.
        if self.strategy_due(now) {
            let Some(t_now) = self.analysis_now_ms() else {
                return Ok(());
            };
            let sig = signal::analyze(&self.history, t_now, &self.cfg);
            if let Some(sig_side) = sig.entry_side() {
                if sig_side == held.other() && sig.confidence >= self.cfg.reversal_confidence {
                    info!(
                        ticker = %self.ticker,
                        confidence = sig.confidence,
                        "reversal signal against held side"
                    );
                    self.reversal_hint = Some(sig_side);
                    return self.begin_exit(ExitReason::Reversal, now).await;
                }
            }
        }
        Ok(())
    }

    async fn begin_exit(&mut self, reason: ExitReason, now: Instant) -> Result<()> {
        info!(ticker = %self.ticker, reason = reason.as_str(), "exiting position");
        self.state = TraderState::Exiting(ExitState {
            reason,
            order_id: None,
            limit_price: 1,
            submitted_at: now,
            pnl_accrued_cents: 0,
            last_fill_price: 0,
        });
        self.phase.set(Phase::Exiting);
        self.submit_exit_order(now).await
    }

    /// Aggressive sell of the held side at mid - 1, re-priced by `poll_exit`
    /// until the position is gone.
    async fn submit_exit_order(&mut self, now: Instant) -> Result<()> {
        let Some(pos) = self.position.as_ref() else {
            return Ok(());
        };
        let (side, size, entry_price) = (pos.side, pos.size, pos.entry_price);

        let limit_price = match self.last_sample.and_then(|s| s.side_mid_tenths(side)) {
            Some(mid) => ((mid / TENTHS_PER_CENT) - 1).clamp(1, 99) as u8,
            // No quotes on our side: price off the entry and let re-pricing
            // chase the market when quotes return.
            None => entry_price.saturating_sub(1).max(1),
        };

        let ack = match self
            .exchange
            .place_order(
                &self.ticker,
                side,
                OrderAction::Sell,
                limit_price,
                size,
                Uuid::new_v4(),
            )
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                warn!(ticker = %self.ticker, error = %e, "exit submit failed; will retry");
                return Ok(());
            }
        };

        match ack.status {
            AckStatus::Filled | AckStatus::PartiallyFilled if ack.filled_qty > 0 => {
                if ack.filled_qty < size {
                    let _ = self.exchange.cancel_order(&ack.order_id).await;
                }
                let price = ack.avg_fill_price.unwrap_or(limit_price);
                let finished = self.apply_exit_fill(ack.filled_qty, price, now);
                self.after_exit(finished, now).await?;
            }
            AckStatus::Resting => {
                if let TraderState::Exiting(exit) = &mut self.state {
                    exit.order_id = Some(ack.order_id);
                    exit.limit_price = limit_price;
                    exit.submitted_at = now;
                }
            }
            _ => {
                debug!(ticker = %self.ticker, "exit order rejected; will retry");
            }
        }
        Ok(())
    }

    async fn poll_exit(&mut self, now: Instant) -> Result<()> {
        let TraderState::Exiting(exit) = &self.state else {
            return Ok(());
        };
        let order_id = exit.order_id.clone();
        let submitted_at = exit.submitted_at;
        let limit_price = exit.limit_price;

        let Some(order_id) = order_id else {
            // Previous submit was rejected or failed; try again at the
            // current price.
            return self.submit_exit_order(now).await;
        };

        let order_timeout = Duration::from_secs(self.cfg.order_timeout_secs);
        if now.duration_since(submitted_at) < order_timeout {
            return Ok(());
        }

        match self.exchange.cancel_order(&order_id).await {
            Ok(CancelOutcome::Canceled) => {
                debug!(ticker = %self.ticker, "exit unfilled; re-pricing");
                if let TraderState::Exiting(exit) = &mut self.state {
                    exit.order_id = None;
                }
                self.submit_exit_order(now).await?;
            }
            Ok(CancelOutcome::NotFound) => {
                let size = self.position.as_ref().map(|p| p.size).unwrap_or(0);
                let finished = self.apply_exit_fill(size, limit_price, now);
                self.after_exit(finished, now).await?;
            }
            Err(e) => {
                warn!(ticker = %self.ticker, error = %e, "exit cancel failed; retrying");
            }
        }
        Ok(())
    }

    /// Book an exit fill. Returns the exit reason once the position is fully
    /// closed.
    fn apply_exit_fill(&mut self, qty: u32, price: u8, _now: Instant) -> Option<ExitReason> {
        let (entry_price, remaining) = {
            let Some(pos) = self.position.as_mut() else {
                return None;
            };
            let qty = qty.min(pos.size);
            if qty == 0 {
                return None;
            }
            let pnl = round_trip_pnl_cents(qty, pos.entry_price, price, self.cfg.kalshi_fee_cents);
            self.risk.commit_exit(&self.ticker, pnl, qty, pos.entry_price);
            pos.size -= qty;
            if let TraderState::Exiting(exit) = &mut self.state {
                exit.pnl_accrued_cents += pnl;
                exit.last_fill_price = price;
            }
            (pos.entry_price, pos.size)
        };

        if remaining > 0 {
            debug!(ticker = %self.ticker, remaining, entry_price, "partial exit; continuing");
            if let TraderState::Exiting(exit) = &mut self.state {
                // Force a fresh order for the remainder on the next tick.
                exit.order_id = None;
            }
            return None;
        }

        self.position = None;
        let TraderState::Exiting(exit) = std::mem::replace(&mut self.state, TraderState::Flat)
        else {
            return None;
        };

        let closed_at_ms = self.last_sample.map(|s| s.ts_ms).unwrap_or_default();
        self.tracker.record_exit(
            &self.ticker,
            exit.last_fill_price,
            closed_at_ms,
            exit.reason,
            exit.pnl_accrued_cents,
        );
        info!(
            ticker = %self.ticker,
            reason = exit.reason.as_str(),
            exit_price = exit.last_fill_price,
            realized_pnl_cents = exit.pnl_accrued_cents,
            "position closed"
        );
        self.phase.set(Phase::Flat);
        Some(exit.reason)
    }

    /// A reversal exit immediately evaluates the opposite entry, still
    /// subject to cooldown and reservation.
    async fn after_exit(&mut self, finished: Option<ExitReason>, now: Instant) -> Result<()> {
        if finished == Some(ExitReason::Reversal) && !self.shutting_down {
            if let Some(side) = self.reversal_hint.take() {
                self.try_enter(now, Some(side)).await?;
            }
        }
        self.reversal_hint = None;
        Ok(())
    }

    async fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        let now = Instant::now();

        match &self.state {
            TraderState::Holding => {
                if let Err(e) = self.begin_exit(ExitReason::Shutdown, now).await {
                    warn!(ticker = %self.ticker, error = %e, "shutdown exit failed; will retry");
                }
            }
            TraderState::AwaitingEntry { .. } => {
                // Resolve the pending entry now; a fill on the race becomes
                // an immediate shutdown exit.
                match std::mem::replace(&mut self.state, TraderState::Flat) {
                    TraderState::AwaitingEntry {
                        reservation,
                        order_id,
                        side,
                        size,
                        limit_price,
                        ..
                    } => match self.exchange.cancel_order(&order_id).await {
                        Ok(CancelOutcome::Canceled) => self.risk.release(reservation),
                        Ok(CancelOutcome::NotFound) => {
                            self.open_position(reservation, side, size, limit_price, order_id, now);
                            if let Err(e) = self.begin_exit(ExitReason::Shutdown, now).await {
                                warn!(ticker = %self.ticker, error = %e, "shutdown exit failed");
                            }
                        }
                        Err(e) => {
                            warn!(ticker = %self.ticker, error = %e, "shutdown cancel failed; releasing");
                            self.risk.release(reservation);
                        }
                    },
                    other => self.state = other,
                }
            }
            TraderState::Flat | TraderState::Exiting(_) => {}
        }
    }
}
