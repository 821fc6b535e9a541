//! Bot lifecycle controller.
//!
//! `BotController` owns one bot: configuration, session, risk and recovery
//! state, the recovery plan, trade history, timers and notifications. All
//! mutable state sits in `BotCore` behind a single mutex that is never held
//! across an await. The executor call is the only suspension point; events
//! raised under the lock are queued and dispatched once it is released.
//!
//! Status machine: `IDLE → START ⇄ PAUSE → STOP`, plus `ERROR` after a
//! failed validation or an emergency stop. `ERROR` is left only through an
//! explicit `start()`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::accountant::{Accountant, PerformanceReport, StatisticsAggregate};
use super::clock::{Clock, SystemClock};
use super::executor::{BalanceProvider, TradeExecutor};
use super::notifier::{BotEvent, EventKind, Notifier, SubscriptionId};
use super::scheduler::{Scheduler, TimerHandle, TimerToken};
use crate::amount::{clamp_stake, round2, saturating_mul};
use crate::config::BotConfiguration;
use crate::risk::{
    self, validate_balance, CooldownCause, GateContext, GateDecision, RiskEngine, RiskState,
    StopReason,
};
use crate::strategy::planner::compute_steps;
use crate::strategy::recovery::{RecoveryController, RecoveryState, RecoveryTransition};
use crate::strategy::{self, StakeContext, TradeOutcome};
use crate::types::{BotError, BotStatus, SessionState, StrategyStep, TradeRequest, TradeResult};

/// Delay before retrying a tick that could not trade.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Period of the schedule monitor and of the counter-reset check.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Balance assumed when nothing better is known.
const DEFAULT_BALANCE: Decimal = dec!(1000);

/// What `start()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Outside the trading window; the bot starts itself once inside.
    AwaitingSchedule,
}

fn to_std(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

struct PreparedTrade {
    request: TradeRequest,
    executor: Arc<dyn TradeExecutor>,
    epoch: u64,
}

struct BotCore {
    config: BotConfiguration,
    status: BotStatus,
    session: SessionState,
    has_session: bool,
    risk: RiskEngine,
    recovery: RecoveryController,
    steps: Vec<StrategyStep>,
    accountant: Accountant,
    history: VecDeque<TradeResult>,
    executor: Option<Arc<dyn TradeExecutor>>,
    balance_provider: Option<Arc<dyn BalanceProvider>>,
    clock: Arc<dyn Clock>,
    /// Bumped whenever a run starts or ends. Results carrying an older
    /// epoch belong to a finished run.
    epoch: u64,
    /// An executor call is outstanding, possibly for an earlier run. Only
    /// its completion clears this, so executions never overlap.
    tick_in_flight: bool,
    in_flight_step: Option<StrategyStep>,
    awaiting_schedule: bool,
    paused_by_schedule: bool,
    last_stop: Option<StopReason>,
    outbox: Vec<BotEvent>,
}

impl BotCore {
    fn new(config: BotConfiguration) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let balance = config.amounts.initial_balance.unwrap_or(DEFAULT_BALANCE);
        // An invalid plan is reported by start(); until then the plan is empty.
        let steps = compute_steps(
            &config.recovery_description(),
            config.amounts.base_stake,
            &config.planner_overrides(),
        )
        .unwrap_or_default();
        Self {
            status: BotStatus::Idle,
            session: SessionState::new(config.amounts.base_stake, balance, clock.now()),
            has_session: false,
            risk: RiskEngine::new(config.risk.clone(), config.rapid_loss.clone()),
            recovery: RecoveryController::new(config.recovery.clone()),
            steps,
            accountant: Accountant::default(),
            history: VecDeque::new(),
            executor: None,
            balance_provider: None,
            clock,
            epoch: 0,
            tick_in_flight: false,
            in_flight_step: None,
            awaiting_schedule: false,
            paused_by_schedule: false,
            last_stop: None,
            outbox: Vec::new(),
            config,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn emit(&mut self, kind: EventKind, message: impl Into<String>, data: Option<serde_json::Value>) {
        let mut event = BotEvent::new(kind, self.config.id, self.now(), message);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.outbox.push(event);
    }

    fn set_status(&mut self, status: BotStatus) {
        let from = self.status;
        if from == status {
            return;
        }
        self.status = status;
        info!(bot = %self.config.name, from = %from, to = %status, "Status changed");
        self.emit(
            EventKind::StatusChanged,
            format!("{from} -> {status}"),
            Some(json!({ "from": from, "to": status })),
        );
    }

    fn within_schedule(&self, now: DateTime<Utc>) -> bool {
        self.config.schedule.is_within(now)
    }

    /// Provider balance, else the last session balance, else the
    /// configured initial balance, else 1000.
    fn resolve_balance(&self) -> Decimal {
        if let Some(balance) = self.balance_provider.as_ref().and_then(|p| p.balance()) {
            return balance;
        }
        if self.has_session {
            return self.session.current_balance;
        }
        self.config.amounts.initial_balance.unwrap_or(DEFAULT_BALANCE)
    }

    fn compute_plan(&self, config: &BotConfiguration) -> Result<Vec<StrategyStep>, BotError> {
        compute_steps(
            &config.recovery_description(),
            config.amounts.base_stake,
            &config.planner_overrides(),
        )
    }

    fn install_steps(&mut self, steps: Vec<StrategyStep>) {
        self.recovery.clamp_to(steps.len());
        self.session.recovery_step_index = self.recovery.state().step_index;
        self.steps = steps;
    }

    // -- Lifecycle ----------------------------------------------------------

    fn start(&mut self, sched: &Scheduler) -> Result<StartOutcome, BotError> {
        if self.status.is_running() {
            return Err(BotError::AlreadyRunning);
        }
        if self.executor.is_none() {
            return Err(BotError::NoExecutor);
        }
        let plan = self
            .config
            .validate()
            .and_then(|()| self.compute_plan(&self.config));
        let steps = match plan {
            Ok(steps) => steps,
            Err(e) => {
                sched.cancel_all();
                self.awaiting_schedule = false;
                error!(bot = %self.config.name, error = %e, "Start rejected");
                self.emit(EventKind::Error, e.to_string(), Some(json!({ "stage": "start" })));
                self.set_status(BotStatus::Error);
                return Err(e);
            }
        };

        sched.cancel_all();
        self.epoch += 1;
        self.in_flight_step = None;
        self.paused_by_schedule = false;
        let now = self.now();

        if !self.within_schedule(now) {
            self.awaiting_schedule = true;
            self.set_status(BotStatus::Idle);
            sched.schedule_after(MONITOR_INTERVAL, TimerToken::ScheduleMonitor);
            info!(bot = %self.config.name, "Outside trading schedule, waiting");
            self.emit(
                EventKind::ScheduleCheck,
                "Outside trading schedule, waiting for the window to open",
                Some(json!({ "within": false })),
            );
            return Ok(StartOutcome::AwaitingSchedule);
        }

        self.awaiting_schedule = false;
        self.last_stop = None;
        let base = self.config.amounts.base_stake;
        let balance = self.resolve_balance();
        self.session = SessionState::new(base, balance, now);
        self.has_session = true;
        self.risk.reset();
        self.recovery.reset();
        self.install_steps(steps);

        let opening = strategy::initial(&self.config.strategy, &StakeContext::from_session(&self.session));
        self.session.strategy = opening.counters;
        self.session.strategy_stake = opening.stake;
        self.session.current_stake = clamp_stake(opening.stake, base, self.config.amounts.max_stake, None);
        self.accountant.begin_run(now);

        self.set_status(BotStatus::Started);
        info!(
            bot = %self.config.name,
            strategy = self.config.strategy.id(),
            base_stake = %base,
            balance = %balance,
            steps = self.steps.len(),
            "Bot started"
        );

        sched.schedule_after(MONITOR_INTERVAL, TimerToken::ScheduleMonitor);
        sched.schedule_after(MONITOR_INTERVAL, TimerToken::PeriodicReset);
        if let Some(limit) = self.config.schedule.max_runtime() {
            sched.schedule_after(limit, TimerToken::MaxRuntime);
        }
        self.schedule_tick(sched, Duration::ZERO);
        Ok(StartOutcome::Started)
    }

    fn pause(&mut self, sched: &Scheduler, by_schedule: bool) -> Result<(), BotError> {
        match self.status {
            BotStatus::Started => {}
            BotStatus::Paused => return Ok(()),
            from => {
                return Err(BotError::InvalidTransition {
                    from,
                    action: "pause".into(),
                })
            }
        }
        sched.cancel_token(TimerToken::Tick);
        self.paused_by_schedule = by_schedule;
        self.set_status(BotStatus::Paused);
        Ok(())
    }

    fn resume(&mut self, sched: &Scheduler) -> Result<(), BotError> {
        match self.status {
            BotStatus::Paused => {}
            BotStatus::Started => return Ok(()),
            from => {
                return Err(BotError::InvalidTransition {
                    from,
                    action: "resume".into(),
                })
            }
        }
        if !self.within_schedule(self.now()) {
            self.paused_by_schedule = true;
            self.emit(
                EventKind::SchedulePaused,
                "Outside trading schedule, staying paused",
                Some(json!({ "within": false })),
            );
            return Ok(());
        }
        self.paused_by_schedule = false;
        self.set_status(BotStatus::Started);
        self.schedule_tick(sched, Duration::ZERO);
        Ok(())
    }

    fn stop(&mut self, sched: &Scheduler) {
        match self.status {
            BotStatus::Started | BotStatus::Paused => self.halt(sched, StopReason::Manual),
            BotStatus::Idle => {
                self.last_stop = Some(StopReason::Manual);
                self.end_run(sched, BotStatus::Stopped);
            }
            BotStatus::Stopped | BotStatus::Error => sched.cancel_all(),
        }
    }

    /// Cancel every timer, close the run and move to `target`.
    fn end_run(&mut self, sched: &Scheduler, target: BotStatus) {
        sched.cancel_all();
        self.epoch += 1;
        self.in_flight_step = None;
        self.awaiting_schedule = false;
        self.paused_by_schedule = false;
        if self.status.is_running() {
            let now = self.now();
            self.accountant.finalize_run(now);
        }
        self.set_status(target);
    }

    /// End a running session with `reason`. No-op when not running, so a
    /// limit hit from two places notifies once.
    fn halt(&mut self, sched: &Scheduler, reason: StopReason) {
        if !self.status.is_running() {
            return;
        }
        if let Some(BotError::CircuitBreaker(msg)) = reason.to_error() {
            self.risk.trip(&msg);
        }
        let kind = match &reason {
            StopReason::Manual => None,
            StopReason::MaxTrades { .. } => Some(EventKind::MaxTradesReached),
            StopReason::StopLoss { .. } | StopReason::DailyLoss { .. } => {
                Some(EventKind::StopLossTriggered)
            }
            StopReason::TakeProfit { .. } | StopReason::DailyProfit { .. } => {
                Some(EventKind::TakeProfitTriggered)
            }
            StopReason::Drawdown { .. } | StopReason::Balance { .. } => {
                Some(EventKind::RiskLimitHit)
            }
            StopReason::MaxRuntime { .. } => Some(EventKind::MaxRuntimeReached),
            StopReason::Strategy { .. } => Some(EventKind::StrategyReset),
            StopReason::EmergencyLoss { .. } | StopReason::Emergency { .. } => {
                Some(EventKind::EmergencyStop)
            }
        };
        let message = reason.to_string();
        info!(
            bot = %self.config.name,
            reason = %message,
            trades = self.session.total_trades,
            pnl = format!("{:+.2}", self.session.total_profit),
            "Run halted"
        );
        if let Some(kind) = kind {
            self.emit(kind, message, serde_json::to_value(&reason).ok());
        }
        self.last_stop = Some(reason);
        self.end_run(sched, BotStatus::Stopped);
    }

    fn emergency(&mut self, sched: &Scheduler, reason: StopReason) {
        if self.status == BotStatus::Error {
            return;
        }
        let message = reason.to_string();
        self.risk.trip(&message);
        error!(bot = %self.config.name, reason = %message, "Emergency stop");
        self.emit(EventKind::EmergencyStop, message, serde_json::to_value(&reason).ok());
        self.last_stop = Some(reason);
        self.end_run(sched, BotStatus::Error);
    }

    // -- Configuration ------------------------------------------------------

    fn rescale_strategy_stake(&mut self, previous_base: Decimal) {
        let base = self.config.amounts.base_stake;
        if self.status.is_running() && previous_base > Decimal::ZERO && previous_base != base {
            self.session.base_stake = base;
            let per_unit = self
                .session
                .strategy_stake
                .checked_div(previous_base)
                .unwrap_or(Decimal::MAX);
            self.session.strategy_stake = round2(saturating_mul(per_unit, base));
        }
    }

    fn set_base_stake(&mut self, stake: Decimal) -> Result<(), BotError> {
        if stake <= Decimal::ZERO {
            return Err(BotError::ConfigValidation(format!(
                "base stake must be positive, got {stake}"
            )));
        }
        if stake > self.config.amounts.max_stake {
            return Err(BotError::ConfigValidation(format!(
                "base stake {stake} exceeds max stake {}",
                self.config.amounts.max_stake
            )));
        }
        let mut candidate = self.config.clone();
        candidate.amounts.base_stake = stake;
        let steps = self.compute_plan(&candidate)?;

        let previous = self.config.amounts.base_stake;
        self.config = candidate;
        self.install_steps(steps);
        self.rescale_strategy_stake(previous);
        info!(bot = %self.config.name, from = %previous, to = %stake, "Base stake updated");
        self.emit(
            EventKind::StakeUpdated,
            format!("Base stake {previous:.2} -> {stake:.2}"),
            Some(json!({ "previous_base": previous, "base_stake": stake, "steps": self.steps.len() })),
        );
        Ok(())
    }

    fn update_configuration(
        &mut self,
        sched: &Scheduler,
        mut config: BotConfiguration,
    ) -> Result<(), BotError> {
        config.id = self.config.id;
        config.created_at = self.config.created_at;
        config.validate()?;
        let steps = self.compute_plan(&config)?;

        let previous = self.config.amounts.base_stake;
        self.risk.set_settings(config.risk.clone(), config.rapid_loss.clone());
        self.recovery.set_settings(config.recovery.clone());
        self.config = config;
        self.install_steps(steps);
        self.rescale_strategy_stake(previous);
        if self.status.is_running() {
            self.rearm_max_runtime(sched);
        }
        info!(bot = %self.config.name, steps = self.steps.len(), "Configuration updated");
        self.emit(
            EventKind::Log,
            "Configuration updated",
            Some(json!({ "steps": self.steps.len(), "strategy": self.config.strategy.id() })),
        );
        Ok(())
    }

    /// Re-arm the runtime limit with whatever is left of it.
    fn rearm_max_runtime(&mut self, sched: &Scheduler) {
        sched.cancel_token(TimerToken::MaxRuntime);
        if let Some(limit) = self.config.schedule.max_runtime() {
            let elapsed = to_std(self.now() - self.session.started_at);
            sched.schedule_after(limit.saturating_sub(elapsed), TimerToken::MaxRuntime);
        }
    }

    // -- Timers -------------------------------------------------------------

    /// Arm the next tick. At most one tick is pending or executing, and
    /// none is armed while safety mode lasts; the cooldown timer arms it.
    fn schedule_tick(&mut self, sched: &Scheduler, delay: Duration) {
        if self.status != BotStatus::Started
            || self.tick_in_flight
            || sched.is_pending(TimerToken::Tick)
            || self.risk.is_safety_active(self.now())
        {
            return;
        }
        sched.schedule_after(delay, TimerToken::Tick);
    }

    /// Handle a non-tick timer. Returns true when a tick should run.
    fn on_timer(&mut self, sched: &Scheduler, token: TimerToken) -> bool {
        match token {
            TimerToken::Tick => return true,
            TimerToken::ScheduleMonitor => self.check_schedule(sched),
            TimerToken::PeriodicReset => self.roll_periods(sched),
            TimerToken::Cooldown => self.end_cooldown(sched),
            TimerToken::RecoveryCooldown => self.end_recovery_cooldown(sched),
            TimerToken::MaxRuntime => {
                let minutes = self.config.schedule.max_runtime_minutes;
                self.halt(sched, StopReason::MaxRuntime { minutes });
            }
        }
        false
    }

    fn check_schedule(&mut self, sched: &Scheduler) {
        let now = self.now();
        let within = self.within_schedule(now);
        debug!(bot = %self.config.name, within, status = %self.status, "Schedule check");
        self.emit(
            EventKind::ScheduleCheck,
            if within { "Inside trading schedule" } else { "Outside trading schedule" },
            Some(json!({ "within": within, "status": self.status })),
        );

        match self.status {
            BotStatus::Started if !within => {
                if self.pause(sched, true).is_ok() {
                    self.emit(EventKind::SchedulePaused, "Paused outside trading schedule", None);
                }
            }
            BotStatus::Paused if within && self.paused_by_schedule => {
                self.paused_by_schedule = false;
                self.set_status(BotStatus::Started);
                self.emit(EventKind::ScheduleResumed, "Trading window open, resuming", None);
                self.schedule_tick(sched, Duration::ZERO);
            }
            BotStatus::Idle if within && self.awaiting_schedule => {
                self.emit(EventKind::ScheduleResumed, "Trading window open, starting", None);
                if let Err(e) = self.start(sched) {
                    warn!(bot = %self.config.name, error = %e, "Scheduled start failed");
                }
                return;
            }
            _ => {}
        }

        if self.status.is_running() || self.awaiting_schedule {
            sched.schedule_after(MONITOR_INTERVAL, TimerToken::ScheduleMonitor);
        }
    }

    fn roll_periods(&mut self, sched: &Scheduler) {
        let now = self.now();
        for period in self.session.roll_periods(now) {
            info!(bot = %self.config.name, period = ?period, "Period counters reset");
        }
        if self.status.is_running() {
            sched.schedule_after(MONITOR_INTERVAL, TimerToken::PeriodicReset);
        }
    }

    fn enter_cooldown(
        &mut self,
        sched: &Scheduler,
        now: DateTime<Utc>,
        duration: Duration,
        cause: CooldownCause,
    ) {
        let until = self.risk.enter_safety_mode(now, duration, cause);
        sched.cancel_token(TimerToken::Tick);
        sched.cancel_token(TimerToken::Cooldown);
        sched.schedule_after(to_std(until - now), TimerToken::Cooldown);
        warn!(bot = %self.config.name, cause = %cause, until = %until, "Cooldown started");
        self.emit(
            EventKind::CooldownStarted,
            format!("Cooldown after {cause} until {}", until.format("%H:%M:%S")),
            Some(json!({
                "cause": cause,
                "until": until,
                "duration_ms": duration.as_millis() as u64,
            })),
        );
    }

    fn end_cooldown(&mut self, sched: &Scheduler) {
        let cause = self.risk.state().safety_cause;
        let max_losses = self.risk.settings().max_consecutive_losses;
        if max_losses > 0 && self.session.consecutive_losses >= max_losses {
            self.session.consecutive_losses = 0;
        }
        self.risk.clear_safety_mode();
        info!(bot = %self.config.name, "Cooldown ended");
        self.emit(EventKind::CooldownEnded, "Cooldown ended", Some(json!({ "cause": cause })));
        self.schedule_tick(sched, Duration::ZERO);
    }

    fn end_recovery_cooldown(&mut self, sched: &Scheduler) {
        self.recovery.end_cooldown();
        info!(bot = %self.config.name, "Recovery cooldown ended");
        self.emit(
            EventKind::CooldownEnded,
            "Recovery cooldown ended",
            Some(json!({ "cause": CooldownCause::Recovery })),
        );
        if self.recovery.settings().auto_resume && !self.status.is_running() {
            if let Err(e) = self.start(sched) {
                warn!(bot = %self.config.name, error = %e, "Auto-resume failed");
            }
        }
    }

    // -- Trading ------------------------------------------------------------

    fn prepare_trade(&mut self, sched: &Scheduler) -> Option<PreparedTrade> {
        if self.status != BotStatus::Started || self.tick_in_flight {
            return None;
        }
        let now = self.now();
        let decision = self.risk.evaluate(&GateContext {
            status: self.status,
            now,
            session: &self.session,
            within_schedule: self.within_schedule(now),
            stop_loss: self.config.amounts.stop_loss,
            take_profit: self.config.amounts.take_profit,
        });
        let stake_cap = match decision {
            GateDecision::Proceed { stake_cap } => stake_cap,
            GateDecision::Abort => return None,
            GateDecision::Wait { reason } => {
                debug!(bot = %self.config.name, reason = %reason, "Tick deferred");
                self.schedule_tick(sched, RETRY_BACKOFF);
                return None;
            }
            GateDecision::Cooldown { duration, cause } => {
                self.enter_cooldown(sched, now, duration, cause);
                return None;
            }
            GateDecision::Stop(reason) => {
                self.halt(sched, reason);
                return None;
            }
            GateDecision::Emergency(reason) => {
                self.emergency(sched, reason);
                return None;
            }
        };
        let Some(executor) = self.executor.clone() else {
            self.emit(EventKind::Error, BotError::NoExecutor.to_string(), None);
            self.schedule_tick(sched, RETRY_BACKOFF);
            return None;
        };

        let base = self.session.base_stake;
        let step = self.recovery.current_step(&self.steps).cloned();
        let balance = self.resolve_balance();
        let mut raw = self
            .recovery
            .recovery_stake(base, &self.steps)
            .unwrap_or(self.session.strategy_stake);
        if let Some(compounded) = self.config.compounding.stake(balance) {
            raw = compounded;
        }
        let stake = clamp_stake(raw, base, self.config.amounts.max_stake, stake_cap);
        let previous = self.session.current_stake;
        if stake != previous {
            self.session.current_stake = stake;
            self.emit(
                EventKind::StakeUpdated,
                format!("Stake {previous:.2} -> {stake:.2}"),
                Some(json!({
                    "previous": previous,
                    "stake": stake,
                    "recovery_step": step.as_ref().map(|s| s.index),
                })),
            );
        }

        if let Err(violation) = validate_balance(stake, balance, base, self.risk.settings()) {
            warn!(bot = %self.config.name, stake = %stake, balance = %balance, error = %violation, "Balance check failed");
            self.halt(
                sched,
                StopReason::Balance {
                    detail: violation.to_string(),
                },
            );
            return None;
        }

        let market = &self.config.market;
        let (contract_type, trade_type, duration, duration_unit) = match &step {
            Some(s) => (s.contract_type, s.trade_type, s.duration, s.duration_unit),
            None => (
                market.contract_type,
                market.resolve_trade_type(self.session.alternation_counter),
                market.duration,
                market.duration_unit,
            ),
        };
        let request = TradeRequest {
            symbol: market.symbol.clone(),
            contract_type,
            trade_type,
            amount: stake,
            duration,
            duration_unit,
            prediction: market.prediction,
            multiplier: market.multiplier,
            allow_equals: market.allow_equals,
            basis: market.basis,
            currency: market.currency.clone(),
        };
        debug!(bot = %self.config.name, request = %request, "Placing trade");

        self.tick_in_flight = true;
        self.in_flight_step = step;
        Some(PreparedTrade {
            request,
            executor,
            epoch: self.epoch,
        })
    }

    fn complete_trade(
        &mut self,
        sched: &Scheduler,
        epoch: u64,
        request: &TradeRequest,
        outcome: anyhow::Result<TradeResult>,
    ) {
        self.tick_in_flight = false;
        if epoch != self.epoch || !self.status.is_running() {
            let data = match &outcome {
                Ok(result) => json!({ "result": result }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            info!(bot = %self.config.name, "Discarding result of a finished run");
            self.emit(EventKind::Log, "Discarded result of a finished run", Some(data));
            // A run started meanwhile has been waiting for this call.
            self.schedule_tick(sched, Duration::ZERO);
            return;
        }
        let step = self.in_flight_step.take();

        match outcome {
            Err(e) => {
                let err = BotError::Execution(e.to_string());
                warn!(bot = %self.config.name, request = %request, error = %e, "Trade failed, retrying");
                self.emit(
                    EventKind::Error,
                    err.to_string(),
                    Some(json!({ "request": request, "retry_ms": RETRY_BACKOFF.as_millis() as u64 })),
                );
                self.schedule_tick(sched, RETRY_BACKOFF);
            }
            Ok(result) => {
                self.process_result(sched, result, step);
                let interval = Duration::from_millis(self.config.trade_interval_ms);
                self.schedule_tick(sched, interval);
            }
        }
    }

    fn process_result(&mut self, sched: &Scheduler, result: TradeResult, step: Option<StrategyStep>) {
        let now = self.now();
        let balance_after = result
            .balance_after
            .unwrap_or(self.session.current_balance + result.profit);
        self.session.record_result(&result, balance_after);
        self.accountant.record(&result);
        self.history.push_back(result.clone());
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }

        info!(
            bot = %self.config.name,
            trade = %result,
            balance = %balance_after,
            session = %self.session,
            "Trade settled"
        );
        let data = serde_json::to_value(&result).ok();
        self.emit(EventKind::TradeExecuted, result.to_string(), data.clone());
        let halt_request = self.advance_strategy(&result);

        if result.won {
            self.emit(EventKind::TradeWon, format!("Won {:+.2}", result.profit), data);
            if let Some(t) = self.recovery.on_win(result.profit) {
                self.apply_recovery(sched, t);
            }
            let daily_target = self.risk.settings().max_daily_profit;
            if let Some(reason) =
                risk::profit_target_hit(&self.session, self.config.amounts.take_profit, daily_target)
            {
                self.halt(sched, reason);
            }
        } else {
            self.emit(EventKind::TradeLost, format!("Lost {:.2}", -result.profit), data);
            if let Some(cooldown) = self.risk.record_loss(now) {
                self.enter_cooldown(sched, now, cooldown, CooldownCause::RapidLoss);
            }
            let daily_limit = self.risk.settings().max_daily_loss;
            if let Some(reason) =
                risk::loss_limit_hit(&self.session, self.config.amounts.stop_loss, daily_limit)
            {
                self.halt(sched, reason);
            } else if let Some(s) = step.filter(|s| s.stop_after_loss) {
                self.halt(
                    sched,
                    StopReason::Strategy {
                        detail: format!("emergency recovery step {} lost", s.index),
                    },
                );
            } else if let Some(t) = self.recovery.on_loss(result.profit, self.steps.len()) {
                self.apply_recovery(sched, t);
            }
        }
        self.session.recovery_step_index = self.recovery.state().step_index;

        if let Some(detail) = halt_request {
            self.halt(sched, StopReason::Strategy { detail });
        }
    }

    /// Feed the settled trade to the progression. Returns a halt request.
    fn advance_strategy(&mut self, result: &TradeResult) -> Option<String> {
        let id = self.config.strategy.id();
        let outcome = strategy::on_result(
            &self.config.strategy,
            &self.session.strategy,
            &TradeOutcome::from(result),
            &StakeContext::from_session(&self.session),
        );
        self.session.strategy = outcome.counters;
        self.session.strategy_stake = outcome.stake;
        for notice in outcome.notices {
            info!(bot = %self.config.name, strategy = id, reason = %notice.reason, "Strategy reset");
            self.emit(EventKind::StrategyReset, notice.reason, Some(json!({ "strategy": id })));
        }
        outcome.halt
    }

    fn apply_recovery(&mut self, sched: &Scheduler, transition: RecoveryTransition) {
        let message = transition.to_string();
        info!(bot = %self.config.name, transition = %message, "Recovery");
        let attempts = self.recovery.state().attempts;
        match transition {
            RecoveryTransition::Triggered { step_index } => {
                let stake = self.recovery.recovery_stake(self.session.base_stake, &self.steps);
                self.emit(
                    EventKind::RecoveryTriggered,
                    message,
                    Some(json!({ "step_index": step_index, "stake": stake, "attempts": attempts })),
                );
            }
            RecoveryTransition::StepChanged { from, to } => {
                self.emit(
                    EventKind::RecoveryStepChanged,
                    message,
                    Some(json!({ "from": from, "to": to, "attempts": attempts })),
                );
            }
            RecoveryTransition::Recovered { pnl } => {
                self.emit(
                    EventKind::RecoveryStepChanged,
                    message,
                    Some(json!({ "to": 0, "pnl": pnl })),
                );
            }
            RecoveryTransition::Exhausted {
                attempts,
                cooldown_ms: Some(ms),
            } => {
                self.emit(
                    EventKind::CooldownStarted,
                    message,
                    Some(json!({
                        "cause": CooldownCause::Recovery,
                        "attempts": attempts,
                        "duration_ms": ms,
                        "auto_resume": self.recovery.settings().auto_resume,
                    })),
                );
                self.end_run(sched, BotStatus::Idle);
                sched.schedule_after(Duration::from_millis(ms), TimerToken::RecoveryCooldown);
            }
            RecoveryTransition::Exhausted {
                attempts,
                cooldown_ms: None,
            } => {
                self.emit(EventKind::Log, message, Some(json!({ "attempts": attempts })));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Shared {
    id: Uuid,
    core: Mutex<BotCore>,
    scheduler: Scheduler,
    notifier: Notifier,
    fired: Mutex<Option<mpsc::UnboundedReceiver<TimerHandle>>>,
}

impl Shared {
    /// Run `f` under the core lock, then dispatch the events it raised.
    fn with_core<R>(&self, f: impl FnOnce(&mut BotCore, &Scheduler) -> R) -> R {
        let (result, events) = {
            let mut core = self.core.lock();
            let result = f(&mut core, &self.scheduler);
            (result, std::mem::take(&mut core.outbox))
        };
        for event in &events {
            self.notifier.emit(event);
        }
        result
    }

    fn on_timer(self: &Arc<Self>, handle: TimerHandle) {
        let tick = self.with_core(|core, sched| {
            sched.acknowledge(handle) && core.on_timer(sched, handle.token)
        });
        if tick {
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.run_tick().await });
        }
    }

    async fn run_tick(self: Arc<Self>) {
        let Some(trade) = self.with_core(|core, sched| core.prepare_trade(sched)) else {
            return;
        };
        let outcome = trade.executor.execute(&trade.request).await;
        self.with_core(|core, sched| core.complete_trade(sched, trade.epoch, &trade.request, outcome));
    }
}

/// Handle to one bot. Cheap to clone; clones share the bot.
///
/// Lifecycle methods arm timers and must be called inside a tokio runtime.
#[derive(Clone)]
pub struct BotController {
    shared: Arc<Shared>,
}

impl BotController {
    pub fn new(config: BotConfiguration) -> Self {
        let (scheduler, fired) = Scheduler::new();
        Self {
            shared: Arc::new(Shared {
                id: config.id,
                core: Mutex::new(BotCore::new(config)),
                scheduler,
                notifier: Notifier::new(),
                fired: Mutex::new(Some(fired)),
            }),
        }
    }

    pub fn with_executor(self, executor: Arc<dyn TradeExecutor>) -> Self {
        self.bind_executor(executor);
        self
    }

    pub fn with_balance_provider(self, provider: Arc<dyn BalanceProvider>) -> Self {
        self.shared.core.lock().balance_provider = Some(provider);
        self
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        self.shared.core.lock().clock = clock;
        self
    }

    /// Seed the lifetime statistics, usually from `storage`.
    pub fn with_statistics(self, statistics: StatisticsAggregate) -> Self {
        self.shared.core.lock().accountant = Accountant::with_lifetime(statistics);
        self
    }

    pub fn bind_executor(&self, executor: Arc<dyn TradeExecutor>) {
        self.shared.core.lock().executor = Some(executor);
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> String {
        self.shared.core.lock().config.name.clone()
    }

    /// Spawn the task that turns fired timers into actions. Runs once per
    /// bot and exits when the bot is dropped.
    fn ensure_driver(&self) {
        let Some(mut fired) = self.shared.fired.lock().take() else {
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(handle) = fired.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.on_timer(handle);
            }
            debug!("Timer driver exited");
        });
    }

    // -- Lifecycle ----------------------------------------------------------

    pub fn start(&self) -> Result<StartOutcome, BotError> {
        self.ensure_driver();
        self.shared.with_core(|core, sched| core.start(sched))
    }

    pub fn pause(&self) -> Result<(), BotError> {
        self.shared.with_core(|core, sched| core.pause(sched, false))
    }

    /// Resume a paused bot. Outside the trading schedule it stays paused
    /// and resumes when the window opens.
    pub fn resume(&self) -> Result<(), BotError> {
        self.shared.with_core(|core, sched| core.resume(sched))
    }

    /// Stop the bot. Every timer is cancelled before this returns.
    pub fn stop(&self) {
        self.shared.with_core(|core, sched| core.stop(sched));
    }

    pub fn emergency_stop(&self, reason: &str) {
        let detail = reason.to_string();
        self.shared.with_core(|core, sched| core.emergency(sched, StopReason::Emergency { detail }));
    }

    pub fn set_base_stake(&self, stake: Decimal) -> Result<(), BotError> {
        self.shared.with_core(|core, _| core.set_base_stake(stake))
    }

    /// Replace the configuration. Identity fields are kept; the recovery
    /// plan is recomputed and the runtime limit re-armed.
    pub fn update_configuration(&self, config: BotConfiguration) -> Result<(), BotError> {
        self.shared.with_core(|core, sched| core.update_configuration(sched, config))
    }

    // -- Snapshots ----------------------------------------------------------

    pub fn status(&self) -> BotStatus {
        self.shared.core.lock().status
    }

    pub fn session(&self) -> SessionState {
        self.shared.core.lock().session.clone()
    }

    pub fn performance(&self) -> PerformanceReport {
        self.shared.core.lock().accountant.performance()
    }

    pub fn statistics(&self) -> StatisticsAggregate {
        self.shared.core.lock().accountant.statistics().clone()
    }

    pub fn trade_history(&self) -> Vec<TradeResult> {
        self.shared.core.lock().history.iter().cloned().collect()
    }

    pub fn configuration(&self) -> BotConfiguration {
        self.shared.core.lock().config.clone()
    }

    pub fn risk_state(&self) -> RiskState {
        self.shared.core.lock().risk.state()
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.shared.core.lock().recovery.state().clone()
    }

    pub fn risk_steps(&self) -> Vec<StrategyStep> {
        self.shared.core.lock().steps.clone()
    }

    pub fn last_stop_reason(&self) -> Option<StopReason> {
        self.shared.core.lock().last_stop.clone()
    }

    /// Number of armed timers.
    pub fn pending_timers(&self) -> usize {
        self.shared.scheduler.pending_count()
    }

    // -- Notifications ------------------------------------------------------

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    pub fn subscribe_channel(&self) -> broadcast::Receiver<BotEvent> {
        self.shared.notifier.subscribe_channel()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
