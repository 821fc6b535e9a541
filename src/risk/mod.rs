//! Risk engine: pre-trade gate, safety mode and balance validation.
//!
//! `RiskEngine::evaluate` runs the gate checks in a fixed order; the first
//! failing check decides. The engine also owns the safety-mode expiry,
//! the circuit-breaker latch and the rapid-loss detector.

pub mod rapid_loss;
pub mod schedule;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::amount::percent_of;
use crate::strategy::planner::MAX_CONSECUTIVE_LOSSES;
use crate::types::{BotError, BotStatus, SessionState};
use rapid_loss::{RapidLossDetector, RapidLossSettings, RapidLossState};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Stop after this many trades in a run.
    #[serde(default)]
    pub max_trades: Option<u32>,
    /// Consecutive losses that put the bot into a cooldown (0 disables).
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_consecutive_loss_cooldown_ms")]
    pub consecutive_loss_cooldown_ms: u64,
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
    #[serde(default)]
    pub max_daily_profit: Option<Decimal>,
    /// Largest allowed decline from the session peak, in percent.
    #[serde(default)]
    pub max_drawdown_pct: Option<Decimal>,
    /// Session loss, in base stakes, that forces an emergency stop.
    #[serde(default = "default_emergency_loss_multiple")]
    pub emergency_loss_multiple: Decimal,
    /// Cap each stake at this percentage of the balance.
    #[serde(default)]
    pub risk_per_trade_pct: Option<Decimal>,
    /// Refuse to trade when the stake is above this share of the balance.
    #[serde(default)]
    pub max_balance_pct_per_trade: Option<Decimal>,
    /// Balance that must remain after a trade, in base stakes.
    #[serde(default = "default_reserve_multiple")]
    pub reserve_multiple: Decimal,
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_consecutive_loss_cooldown_ms() -> u64 {
    300_000
}

fn default_emergency_loss_multiple() -> Decimal {
    dec!(20)
}

fn default_reserve_multiple() -> Decimal {
    dec!(3)
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_trades: None,
            max_consecutive_losses: default_max_consecutive_losses(),
            consecutive_loss_cooldown_ms: default_consecutive_loss_cooldown_ms(),
            max_daily_loss: None,
            max_daily_profit: None,
            max_drawdown_pct: None,
            emergency_loss_multiple: default_emergency_loss_multiple(),
            risk_per_trade_pct: None,
            max_balance_pct_per_trade: None,
            reserve_multiple: default_reserve_multiple(),
        }
    }
}

impl RiskSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        let pct_fields = [
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("max_balance_pct_per_trade", self.max_balance_pct_per_trade),
        ];
        for (name, value) in pct_fields {
            if let Some(v) = value {
                if v <= Decimal::ZERO || v > dec!(100) {
                    return Err(BotError::ConfigValidation(format!(
                        "{name} must be within (0, 100], got {v}"
                    )));
                }
            }
        }
        if self.max_consecutive_losses > MAX_CONSECUTIVE_LOSSES {
            return Err(BotError::ConfigValidation(format!(
                "max_consecutive_losses must be at most {MAX_CONSECUTIVE_LOSSES}, got {}",
                self.max_consecutive_losses
            )));
        }
                if self.emergency_loss_multiple <= Decimal::ZERO {
            return Err(BotError::ConfigValidation(
                "emergency_loss_multiple must be positive".into(),
            ));
        }
        if self.reserve_multiple < Decimal::ZERO {
            return Err(BotError::ConfigValidation(
                "reserve_multiple cannot be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn consecutive_loss_cooldown(&self) -> Duration {
        Duration::from_millis(self.consecutive_loss_cooldown_ms)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Why a timed pause was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownCause {
    ConsecutiveLosses,
    RapidLoss,
    Recovery,
}

impl fmt::Display for CooldownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownCause::ConsecutiveLosses => write!(f, "consecutive losses"),
            CooldownCause::RapidLoss => write!(f, "rapid losses"),
            CooldownCause::Recovery => write!(f, "recovery attempts exhausted"),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    MaxTrades { limit: u32 },
    StopLoss { loss: Decimal, limit: Decimal },
    DailyLoss { loss: Decimal, limit: Decimal },
    TakeProfit { profit: Decimal, limit: Decimal },
    DailyProfit { profit: Decimal, limit: Decimal },
    Drawdown { pct: Decimal, limit: Decimal },
    EmergencyLoss { loss: Decimal, threshold: Decimal },
    Balance { detail: String },
    MaxRuntime { minutes: u64 },
    Strategy { detail: String },
    Emergency { detail: String },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Manual => write!(f, "Stopped by user"),
            StopReason::MaxTrades { limit } => write!(f, "Maximum trades reached ({limit})"),
            StopReason::StopLoss { loss, limit } => {
                write!(f, "Stop-loss hit: session loss {loss:.2} >= {limit:.2}")
            }
            StopReason::DailyLoss { loss, limit } => {
                write!(f, "Daily loss limit hit: {loss:.2} >= {limit:.2}")
            }
            StopReason::TakeProfit { profit, limit } => {
                write!(f, "Take-profit hit: session profit {profit:.2} >= {limit:.2}")
            }
            StopReason::DailyProfit { profit, limit } => {
                write!(f, "Daily profit target hit: {profit:.2} >= {limit:.2}")
            }
            StopReason::Drawdown { pct, limit } => {
                write!(f, "Drawdown {pct:.2}% >= {limit:.2}%")
            }
            StopReason::EmergencyLoss { loss, threshold } => {
                write!(f, "Emergency: session loss {loss:.2} above {threshold:.2}")
            }
            StopReason::Balance { detail } => write!(f, "Balance check failed: {detail}"),
            StopReason::MaxRuntime { minutes } => {
                write!(f, "Maximum runtime reached ({minutes} min)")
            }
            StopReason::Strategy { detail } => write!(f, "Strategy halted: {detail}"),
            StopReason::Emergency { detail } => write!(f, "Emergency stop: {detail}"),
        }
    }
}

impl StopReason {
    /// The domain error a stop corresponds to, if any.
    pub fn to_error(&self) -> Option<BotError> {
        match self {
            StopReason::StopLoss { .. }
            | StopReason::DailyLoss { .. }
            | StopReason::Drawdown { .. }
            | StopReason::Balance { .. } => Some(BotError::CircuitBreaker(self.to_string())),
            StopReason::EmergencyLoss { .. } | StopReason::Emergency { .. } => {
                Some(BotError::EmergencyStop(self.to_string()))
            }
            _ => None,
        }
    }
}

/// Inputs to one gate evaluation.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub status: BotStatus,
    pub now: DateTime<Utc>,
    pub session: &'a SessionState,
    pub within_schedule: bool,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// Outcome of the pre-trade gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Not running; drop the tick.
    Abort,
    /// Try again later.
    Wait { reason: String },
    /// Pause trading for a while.
    Cooldown { duration: Duration, cause: CooldownCause },
    /// End the run.
    Stop(StopReason),
    /// End the run and move to `ERROR`.
    Emergency(StopReason),
    /// Trade, shrinking the stake to `stake_cap` when set.
    Proceed { stake_cap: Option<Decimal> },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Mutable risk state of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub circuit_breaker: bool,
    pub circuit_reason: Option<String>,
    pub safety_mode_until: Option<DateTime<Utc>>,
    pub safety_cause: Option<CooldownCause>,
    pub rapid_loss: RapidLossState,
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    settings: RiskSettings,
    state: RiskState,
    rapid: RapidLossDetector,
}

impl RiskEngine {
    pub fn new(settings: RiskSettings, rapid_loss: RapidLossSettings) -> Self {
        Self {
            settings,
            state: RiskState::default(),
            rapid: RapidLossDetector::new(rapid_loss),
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RiskSettings, rapid_loss: RapidLossSettings) {
        self.settings = settings;
        self.rapid.set_settings(rapid_loss);
    }

    /// Snapshot including the rapid-loss window.
    pub fn state(&self) -> RiskState {
        RiskState {
            rapid_loss: self.rapid.state().clone(),
            ..self.state.clone()
        }
    }

    /// Fresh state for a new run.
    pub fn reset(&mut self) {
        self.state = RiskState::default();
        self.rapid.reset();
    }

    pub fn evaluate(&self, ctx: &GateContext<'_>) -> GateDecision {
        let session = ctx.session;

        if ctx.status != BotStatus::Started {
            return GateDecision::Abort;
        }

        if let Some(until) = self.active_safety(ctx.now) {
            return GateDecision::Wait {
                reason: format!("Safety mode active until {}", until.format("%H:%M:%S")),
            };
        }

        if !ctx.within_schedule {
            return GateDecision::Wait {
                reason: "Outside trading schedule".into(),
            };
        }

        if let Some(limit) = self.settings.max_trades {
            if session.total_trades >= limit {
                return GateDecision::Stop(StopReason::MaxTrades { limit });
            }
        }

        let max_losses = self.settings.max_consecutive_losses;
        if max_losses > 0 && session.consecutive_losses >= max_losses {
            return GateDecision::Cooldown {
                duration: self.settings.consecutive_loss_cooldown(),
                cause: CooldownCause::ConsecutiveLosses,
            };
        }

        if let Some(reason) = loss_limit_hit(session, ctx.stop_loss, self.settings.max_daily_loss) {
            return GateDecision::Stop(reason);
        }

        if let Some(reason) =
            profit_target_hit(session, ctx.take_profit, self.settings.max_daily_profit)
        {
            return GateDecision::Stop(reason);
        }

        if let Some(limit) = self.settings.max_drawdown_pct {
            let pct = session.drawdown_pct();
            if pct >= limit {
                return GateDecision::Stop(StopReason::Drawdown { pct, limit });
            }
        }

        let threshold = session.base_stake * self.settings.emergency_loss_multiple;
        let loss = session.session_loss();
        if loss > threshold {
            return GateDecision::Emergency(StopReason::EmergencyLoss { loss, threshold });
        }

        let stake_cap = self
            .settings
            .risk_per_trade_pct
            .map(|pct| percent_of(session.current_balance, pct));
        GateDecision::Proceed { stake_cap }
    }

    fn active_safety(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.state.safety_mode_until.filter(|until| now < *until)
    }

    pub fn is_safety_active(&self, now: DateTime<Utc>) -> bool {
        self.active_safety(now).is_some()
    }

    pub fn safety_mode_until(&self) -> Option<DateTime<Utc>> {
        self.state.safety_mode_until
    }

    /// Start a timed pause. Returns the expiry.
    pub fn enter_safety_mode(
        &mut self,
        now: DateTime<Utc>,
        duration: Duration,
        cause: CooldownCause,
    ) -> DateTime<Utc> {
        let until = now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let until = match self.state.safety_mode_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        self.state.safety_mode_until = Some(until);
        self.state.safety_cause = Some(cause);
        debug!(cause = %cause, until = %until, "Safety mode entered");
        until
    }

    pub fn clear_safety_mode(&mut self) {
        self.state.safety_mode_until = None;
        self.state.safety_cause = None;
    }

    /// Feed a loss to the rapid-loss detector. Returns the cooldown to
    /// enter when it trips.
    pub fn record_loss(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.rapid.record_loss(now)
    }

    pub fn trip(&mut self, reason: &str) {
        warn!(reason, "Circuit breaker tripped");
        self.state.circuit_breaker = true;
        self.state.circuit_reason = Some(reason.to_string());
    }

    pub fn is_tripped(&self) -> bool {
        self.state.circuit_breaker
    }
}

/// Session stop-loss or daily loss limit, whichever is hit first.
pub fn loss_limit_hit(
    session: &SessionState,
    stop_loss: Option<Decimal>,
    max_daily_loss: Option<Decimal>,
) -> Option<StopReason> {
    let loss = session.session_loss();
    if let Some(limit) = stop_loss {
        if loss >= limit {
            return Some(StopReason::StopLoss { loss, limit });
        }
    }
    if let Some(limit) = max_daily_loss {
        let daily = session.daily.loss();
        if daily >= limit {
            return Some(StopReason::DailyLoss { loss: daily, limit });
        }
    }
    None
}

/// Session take-profit or daily profit target, whichever is hit first.
pub fn profit_target_hit(
    session: &SessionState,
    take_profit: Option<Decimal>,
    max_daily_profit: Option<Decimal>,
) -> Option<StopReason> {
    if let Some(limit) = take_profit {
        if session.total_profit >= limit {
            return Some(StopReason::TakeProfit {
                profit: session.total_profit,
                limit,
            });
        }
    }
    if let Some(limit) = max_daily_profit {
        if session.daily.profit >= limit {
            return Some(StopReason::DailyProfit {
                profit: session.daily.profit,
                limit,
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Balance validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BalanceViolation {
    #[error("stake {stake:.2} exceeds balance {balance:.2}")]
    InsufficientBalance { stake: Decimal, balance: Decimal },

    #[error("balance after trade {remaining:.2} below reserve {reserve:.2}")]
    ReserveBreached { remaining: Decimal, reserve: Decimal },

    #[error("stake is {pct:.2}% of balance, limit {limit:.2}%")]
    ExposureTooHigh { pct: Decimal, limit: Decimal },
}

/// Reject a stake the account cannot safely carry.
pub fn validate_balance(
    stake: Decimal,
    balance: Decimal,
    base_stake: Decimal,
    settings: &RiskSettings,
) -> Result<(), BalanceViolation> {
    if stake > balance {
        return Err(BalanceViolation::InsufficientBalance { stake, balance });
    }
    let remaining = balance - stake;
    let reserve = base_stake * settings.reserve_multiple;
    if remaining < reserve {
        return Err(BalanceViolation::ReserveBreached { remaining, reserve });
    }
    if let Some(limit) = settings.max_balance_pct_per_trade {
        if balance > Decimal::ZERO {
            let pct = stake / balance * dec!(100);
            if pct > limit {
                return Err(BalanceViolation::ExposureTooHigh { pct, limit });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractType, TradeResult, TradeType};

    fn make_session(base: Decimal) -> SessionState {
        SessionState::new(base, dec!(1000), Utc::now())
    }

    fn settle(session: &mut SessionState, won: bool, stake: Decimal, profit: Decimal) {
        let now = Utc::now();
        let balance = session.current_balance + profit;
        session.record_result(
            &TradeResult {
                contract_id: "c".into(),
                symbol: "R_100".into(),
                contract_type: ContractType::RiseFall,
                trade_type: TradeType::Rise,
                stake,
                payout: if won { stake + profit } else { Decimal::ZERO },
                profit,
                won,
                opened_at: now,
                closed_at: now,
                balance_after: Some(balance),
            },
            balance,
        );
    }

    fn ctx<'a>(session: &'a SessionState) -> GateContext<'a> {
        GateContext {
            status: BotStatus::Started,
            now: Utc::now(),
            session,
            within_schedule: true,
            stop_loss: None,
            take_profit: None,
        }
    }

    fn make_engine(settings: RiskSettings) -> RiskEngine {
        RiskEngine::new(settings, RapidLossSettings::default())
    }

    #[test]
    fn test_not_running_aborts_first() {
        let engine = make_engine(RiskSettings::default());
        let session = make_session(dec!(10));
        let mut c = ctx(&session);
        c.status = BotStatus::Paused;
        c.within_schedule = false;
        assert_eq!(engine.evaluate(&c), GateDecision::Abort);
    }

    #[test]
    fn test_clean_session_proceeds() {
        let engine = make_engine(RiskSettings::default());
        let session = make_session(dec!(10));
        assert_eq!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Proceed { stake_cap: None }
        );
    }

    #[test]
    fn test_stop_loss_exactly_reached() {
        let engine = make_engine(RiskSettings::default());
        let mut session = make_session(dec!(10));
        settle(&mut session, false, dec!(20), dec!(-20));
        settle(&mut session, false, dec!(30), dec!(-30));
        let mut c = ctx(&session);
        c.stop_loss = Some(dec!(50));
        match engine.evaluate(&c) {
            GateDecision::Stop(StopReason::StopLoss { loss, limit }) => {
                assert_eq!(loss, dec!(50));
                assert_eq!(limit, dec!(50));
            }
            other => panic!("expected stop-loss, got {other:?}"),
        }
    }

    #[test]
    fn test_safety_mode_waits() {
        let mut engine = make_engine(RiskSettings::default());
        let session = make_session(dec!(10));
        let now = Utc::now();
        engine.enter_safety_mode(now, Duration::from_secs(30), CooldownCause::RapidLoss);
        let mut c = ctx(&session);
        c.now = now;
        assert!(matches!(engine.evaluate(&c), GateDecision::Wait { .. }));
        c.now = now + chrono::Duration::seconds(31);
        assert!(matches!(engine.evaluate(&c), GateDecision::Proceed { .. }));
    }

    #[test]
    fn test_safety_mode_never_shortened() {
        let mut engine = make_engine(RiskSettings::default());
        let now = Utc::now();
        let long = engine.enter_safety_mode(now, Duration::from_secs(300), CooldownCause::RapidLoss);
        let again =
            engine.enter_safety_mode(now, Duration::from_secs(10), CooldownCause::ConsecutiveLosses);
        assert_eq!(long, again);
        engine.clear_safety_mode();
        assert!(!engine.is_safety_active(now));
    }

    #[test]
    fn test_outside_schedule_waits() {
        let engine = make_engine(RiskSettings::default());
        let session = make_session(dec!(10));
        let mut c = ctx(&session);
        c.within_schedule = false;
        assert_eq!(
            engine.evaluate(&c),
            GateDecision::Wait {
                reason: "Outside trading schedule".into()
            }
        );
    }

    #[test]
    fn test_max_trades_before_consecutive_losses() {
        let engine = make_engine(RiskSettings {
            max_trades: Some(2),
            max_consecutive_losses: 2,
            ..Default::default()
        });
        let mut session = make_session(dec!(10));
        settle(&mut session, false, dec!(10), dec!(-10));
        settle(&mut session, false, dec!(10), dec!(-10));
        assert_eq!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Stop(StopReason::MaxTrades { limit: 2 })
        );
    }

    #[test]
    fn test_consecutive_losses_boundary() {
        let engine = make_engine(RiskSettings {
            max_consecutive_losses: 3,
            consecutive_loss_cooldown_ms: 1_000,
            ..Default::default()
        });
        let mut session = make_session(dec!(10));
        settle(&mut session, false, dec!(10), dec!(-10));
        settle(&mut session, false, dec!(10), dec!(-10));
        assert!(matches!(engine.evaluate(&ctx(&session)), GateDecision::Proceed { .. }));
        settle(&mut session, false, dec!(10), dec!(-10));
        assert_eq!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Cooldown {
                duration: Duration::from_secs(1),
                cause: CooldownCause::ConsecutiveLosses,
            }
        );
    }

    #[test]
    fn test_daily_limits() {
        let engine = make_engine(RiskSettings {
            max_consecutive_losses: 0,
            max_daily_loss: Some(dec!(25)),
            max_daily_profit: Some(dec!(40)),
            ..Default::default()
        });
        let mut session = make_session(dec!(10));
        settle(&mut session, false, dec!(30), dec!(-30));
        assert!(matches!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Stop(StopReason::DailyLoss { .. })
        ));

        let mut session = make_session(dec!(10));
        settle(&mut session, true, dec!(50), dec!(45));
        assert!(matches!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Stop(StopReason::DailyProfit { .. })
        ));
    }

    #[test]
    fn test_take_profit() {
        let engine = make_engine(RiskSettings::default());
        let mut session = make_session(dec!(10));
        settle(&mut session, true, dec!(20), dec!(19));
        let mut c = ctx(&session);
        c.take_profit = Some(dec!(19));
        assert!(matches!(
            engine.evaluate(&c),
            GateDecision::Stop(StopReason::TakeProfit { .. })
        ));
    }

    #[test]
    fn test_drawdown() {
        let engine = make_engine(RiskSettings {
            max_consecutive_losses: 0,
            max_drawdown_pct: Some(dec!(5)),
            ..Default::default()
        });
        let mut session = make_session(dec!(10));
        settle(&mut session, false, dec!(49), dec!(-49));
        assert!(matches!(engine.evaluate(&ctx(&session)), GateDecision::Proceed { .. }));
        settle(&mut session, false, dec!(1), dec!(-1));
        assert!(matches!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Stop(StopReason::Drawdown { .. })
        ));
    }

    #[test]
    fn test_emergency_after_absolute_limits() {
        let engine = make_engine(RiskSettings {
            max_consecutive_losses: 0,
            ..Default::default()
        });
        let mut session = make_session(dec!(1));
        settle(&mut session, false, dec!(20), dec!(-20));
        // Exactly 20x base is not above the threshold.
        assert!(matches!(engine.evaluate(&ctx(&session)), GateDecision::Proceed { .. }));
        settle(&mut session, false, dec!(0.5), dec!(-0.5));
        assert!(matches!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Emergency(StopReason::EmergencyLoss { .. })
        ));

        // A stop-loss that is also hit takes precedence.
        let mut c = ctx(&session);
        c.stop_loss = Some(dec!(10));
        assert!(matches!(
            engine.evaluate(&c),
            GateDecision::Stop(StopReason::StopLoss { .. })
        ));
    }

    #[test]
    fn test_risk_per_trade_cap() {
        let engine = make_engine(RiskSettings {
            risk_per_trade_pct: Some(dec!(2)),
            ..Default::default()
        });
        let session = make_session(dec!(10));
        assert_eq!(
            engine.evaluate(&ctx(&session)),
            GateDecision::Proceed {
                stake_cap: Some(dec!(20))
            }
        );
    }

    #[test]
    fn test_balance_validation() {
        let settings = RiskSettings {
            max_balance_pct_per_trade: Some(dec!(10)),
            ..Default::default()
        };
        assert!(validate_balance(dec!(10), dec!(1000), dec!(10), &settings).is_ok());
        assert!(matches!(
            validate_balance(dec!(60), dec!(50), dec!(10), &settings),
            Err(BalanceViolation::InsufficientBalance { .. })
        ));
        assert!(matches!(
            validate_balance(dec!(25), dec!(50), dec!(10), &settings),
            Err(BalanceViolation::ReserveBreached { .. })
        ));
        assert!(matches!(
            validate_balance(dec!(150), dec!(1000), dec!(10), &settings),
            Err(BalanceViolation::ExposureTooHigh { .. })
        ));
    }

    #[test]
    fn test_trip_latch() {
        let mut engine = make_engine(RiskSettings::default());
        assert!(!engine.is_tripped());
        engine.trip("balance");
        assert!(engine.is_tripped());
        assert_eq!(engine.state().circuit_reason.as_deref(), Some("balance"));
        engine.reset();
        assert!(!engine.is_tripped());
    }

    #[test]
    fn test_settings_validation() {
        assert!(RiskSettings::default().validate().is_ok());

        let at_limit = RiskSettings {
            max_consecutive_losses: MAX_CONSECUTIVE_LOSSES,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let typo = RiskSettings {
            max_consecutive_losses: 4_000_000_000,
            ..Default::default()
        };
        assert!(matches!(typo.validate(), Err(BotError::ConfigValidation(_))));

        let bad_pct = RiskSettings {
            max_drawdown_pct: Some(dec!(150)),
            ..Default::default()
        };
        assert!(bad_pct.validate().is_err());
    }

    #[test]
    fn test_stop_reason_errors() {
        let sl = StopReason::StopLoss {
            loss: dec!(50),
            limit: dec!(50),
        };
        assert!(matches!(sl.to_error(), Some(BotError::CircuitBreaker(_))));
        assert_eq!(StopReason::Manual.to_error(), None);
        let json = serde_json::to_value(&StopReason::MaxTrades { limit: 3 }).unwrap();
        assert_eq!(json["reason"], "max_trades");
    }
}
