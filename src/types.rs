//! Shared types for the STAKEFLOW engine.
//!
//! These types form the data model used across all modules: lifecycle
//! status, contract vocabulary, trade requests/results, the per-run
//! session and the domain error type. Strategy, risk and engine modules
//! depend on them without depending on each other.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Lifecycle status
// ---------------------------------------------------------------------------

/// Bot lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "START")]
    Started,
    #[serde(rename = "PAUSE")]
    Paused,
    #[serde(rename = "STOP")]
    Stopped,
    #[serde(rename = "ERROR")]
    Error,
}

impl BotStatus {
    /// Whether a run is in progress (trading or paused).
    pub fn is_running(&self) -> bool {
        matches!(self, BotStatus::Started | BotStatus::Paused)
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "IDLE"),
            BotStatus::Started => write!(f, "START"),
            BotStatus::Paused => write!(f, "PAUSE"),
            BotStatus::Stopped => write!(f, "STOP"),
            BotStatus::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract vocabulary
// ---------------------------------------------------------------------------

/// Contract family offered by the brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    RiseFall,
    HigherLower,
    TouchNoTouch,
    EvenOdd,
    OverUnder,
    MatchesDiffers,
    Multipliers,
}

impl ContractType {
    /// All known contract types (useful for iteration).
    pub const ALL: &'static [ContractType] = &[
        ContractType::RiseFall,
        ContractType::HigherLower,
        ContractType::TouchNoTouch,
        ContractType::EvenOdd,
        ContractType::OverUnder,
        ContractType::MatchesDiffers,
        ContractType::Multipliers,
    ];

    /// Whether `trade_type` is one of this contract's two sides.
    pub fn allows(&self, trade_type: TradeType) -> bool {
        let (a, b) = self.sides();
        trade_type == a || trade_type == b
    }

    /// The two trade sub-types belonging to this contract.
    pub fn sides(&self) -> (TradeType, TradeType) {
        match self {
            ContractType::RiseFall => (TradeType::Rise, TradeType::Fall),
            ContractType::HigherLower => (TradeType::Higher, TradeType::Lower),
            ContractType::TouchNoTouch => (TradeType::Touch, TradeType::NoTouch),
            ContractType::EvenOdd => (TradeType::Even, TradeType::Odd),
            ContractType::OverUnder => (TradeType::Over, TradeType::Under),
            ContractType::MatchesDiffers => (TradeType::Matches, TradeType::Differs),
            ContractType::Multipliers => (TradeType::MultUp, TradeType::MultDown),
        }
    }

    /// Digit contracts need a last-digit prediction.
    pub fn requires_prediction(&self) -> bool {
        matches!(self, ContractType::OverUnder | ContractType::MatchesDiffers)
    }

    pub fn requires_multiplier(&self) -> bool {
        matches!(self, ContractType::Multipliers)
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractType::RiseFall => write!(f, "Rise/Fall"),
            ContractType::HigherLower => write!(f, "Higher/Lower"),
            ContractType::TouchNoTouch => write!(f, "Touch/No Touch"),
            ContractType::EvenOdd => write!(f, "Even/Odd"),
            ContractType::OverUnder => write!(f, "Over/Under"),
            ContractType::MatchesDiffers => write!(f, "Matches/Differs"),
            ContractType::Multipliers => write!(f, "Multipliers"),
        }
    }
}

/// Trade sub-type (one side of a contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Rise,
    Fall,
    Higher,
    Lower,
    Touch,
    NoTouch,
    Even,
    Odd,
    Over,
    Under,
    Matches,
    Differs,
    MultUp,
    MultDown,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeType::Rise => "RISE",
            TradeType::Fall => "FALL",
            TradeType::Higher => "HIGHER",
            TradeType::Lower => "LOWER",
            TradeType::Touch => "TOUCH",
            TradeType::NoTouch => "NOTOUCH",
            TradeType::Even => "DIGITEVEN",
            TradeType::Odd => "DIGITODD",
            TradeType::Over => "DIGITOVER",
            TradeType::Under => "DIGITUNDER",
            TradeType::Matches => "DIGITMATCH",
            TradeType::Differs => "DIGITDIFF",
            TradeType::MultUp => "MULTUP",
            TradeType::MultDown => "MULTDOWN",
        };
        write!(f, "{s}")
    }
}

/// Contract duration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Ticks,
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// How the trade amount is interpreted by the brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    #[default]
    Stake,
    Payout,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Everything the external executor needs to buy one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub contract_type: ContractType,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub prediction: Option<u8>,
    pub multiplier: Option<Decimal>,
    pub allow_equals: bool,
    pub basis: Basis,
    pub currency: String,
}

impl fmt::Display for TradeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.2} {} for {} {:?}",
            self.symbol,
            self.contract_type,
            self.trade_type,
            self.amount,
            self.currency,
            self.duration,
            self.duration_unit,
        )
    }
}

/// One settled contract, as reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub contract_id: String,
    pub symbol: String,
    pub contract_type: ContractType,
    pub trade_type: TradeType,
    pub stake: Decimal,
    /// Gross amount returned (zero on a loss).
    pub payout: Decimal,
    /// Net profit: payout − stake.
    pub profit: Decimal,
    pub won: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Account balance after settlement, when the executor knows it.
    #[serde(default)]
    pub balance_after: Option<Decimal>,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.won { "WON" } else { "LOST" };
        write!(
            f,
            "[{}] {} {} stake={:.2} payout={:.2} profit={:+.2} ({outcome})",
            self.contract_id, self.symbol, self.trade_type, self.stake, self.payout, self.profit,
        )
    }
}

impl TradeResult {
    /// Net profit per unit staked on a win (e.g. 0.95). Zero when lost.
    pub fn payout_ratio(&self) -> Decimal {
        if !self.won || self.stake.is_zero() {
            Decimal::ZERO
        } else {
            self.profit / self.stake
        }
    }
}

// ---------------------------------------------------------------------------
// Planner output
// ---------------------------------------------------------------------------

/// One precomputed recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStep {
    pub index: usize,
    pub stake: Decimal,
    /// `stake / base_stake`.
    pub multiplier: Decimal,
    pub contract_type: ContractType,
    pub trade_type: TradeType,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub anticipated_profit_pct: Decimal,
    /// Human-readable derivation of `stake`.
    pub formula: String,
    pub is_emergency_recovery: bool,
    pub stop_after_loss: bool,
}

impl fmt::Display for StrategyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} stake={:.2} (x{:.2}) profit={:.1}%{}",
            self.index,
            self.contract_type,
            self.trade_type,
            self.stake,
            self.multiplier,
            self.anticipated_profit_pct,
            if self.is_emergency_recovery { " [EMERGENCY]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Rolling counters for one reporting period (hour, day or week).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodCounters {
    pub started_at: DateTime<Utc>,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub profit: Decimal,
}

impl PeriodCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            trades: 0,
            wins: 0,
            losses: 0,
            profit: Decimal::ZERO,
        }
    }

    pub fn record(&mut self, profit: Decimal, won: bool) {
        self.trades += 1;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.profit += profit;
    }

    /// Loss for the period as a positive number (zero when in profit).
    pub fn loss(&self) -> Decimal {
        (-self.profit).max(Decimal::ZERO)
    }

    /// Reset the counters if `interval` has elapsed. Returns true on reset.
    pub fn roll_if_elapsed(&mut self, now: DateTime<Utc>, interval: Duration) -> bool {
        if now - self.started_at >= interval {
            *self = Self::new(now);
            true
        } else {
            false
        }
    }
}

/// Reporting period for periodic counter resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
}

impl Period {
    pub fn interval(&self) -> Duration {
        match self {
            Period::Hourly => Duration::hours(1),
            Period::Daily => Duration::days(1),
            Period::Weekly => Duration::weeks(1),
        }
    }
}

/// Per-strategy progression counters. Owned by the session, replaced
/// wholesale by every strategy computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCounters {
    pub martingale_step: u32,
    pub dalembert_units: u32,
    pub sequence_step: usize,
    pub completed_cycles: u32,
    pub oscar_units: u32,
    pub oscar_cycle_profit: Decimal,
    pub trades_since_reset: u32,
    pub wins_since_reset: u32,
    /// Net profit accumulated since the progression last reset.
    pub progression_profit: Decimal,
}

impl Default for StrategyCounters {
    fn default() -> Self {
        Self {
            martingale_step: 0,
            dalembert_units: 1,
            sequence_step: 0,
            completed_cycles: 0,
            oscar_units: 1,
            oscar_cycle_profit: Decimal::ZERO,
            trades_since_reset: 0,
            wins_since_reset: 0,
            progression_profit: Decimal::ZERO,
        }
    }
}

/// State of one run. Reset on every `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub base_stake: Decimal,
    /// Stake proposed by the strategy for the next trade.
    pub strategy_stake: Decimal,
    /// Final stake of the last resolved tick (after recovery and clamping).
    pub current_stake: Decimal,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    pub peak_balance: Decimal,
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub total_profit: Decimal,
    pub total_staked: Decimal,
    pub hourly: PeriodCounters,
    pub daily: PeriodCounters,
    pub weekly: PeriodCounters,
    pub recovery_step_index: usize,
    pub strategy: StrategyCounters,
    pub alternation_counter: u32,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trades={} (W{}/L{}) streak=+{}/-{} pnl={:+.2} stake={:.2} balance={:.2} peak={:.2}",
            self.total_trades,
            self.wins,
            self.losses,
            self.consecutive_wins,
            self.consecutive_losses,
            self.total_profit,
            self.current_stake,
            self.current_balance,
            self.peak_balance,
        )
    }
}

impl SessionState {
    pub fn new(base_stake: Decimal, balance: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            base_stake,
            strategy_stake: base_stake,
            current_stake: base_stake,
            starting_balance: balance,
            current_balance: balance,
            peak_balance: balance,
            total_trades: 0,
            wins: 0,
            losses: 0,
            consecutive_wins: 0,
            consecutive_losses: 0,
            total_profit: Decimal::ZERO,
            total_staked: Decimal::ZERO,
            hourly: PeriodCounters::new(now),
            daily: PeriodCounters::new(now),
            weekly: PeriodCounters::new(now),
            recovery_step_index: 0,
            strategy: StrategyCounters::default(),
            alternation_counter: 0,
        }
    }

    /// Apply a settled trade to the counters and balances.
    pub fn record_result(&mut self, result: &TradeResult, balance_after: Decimal) {
        self.total_trades += 1;
        self.total_staked += result.stake;
        self.total_profit += result.profit;
        if result.won {
            self.wins += 1;
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.losses += 1;
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }
        self.hourly.record(result.profit, result.won);
        self.daily.record(result.profit, result.won);
        self.weekly.record(result.profit, result.won);
        self.alternation_counter += 1;
        self.current_balance = balance_after;
        if balance_after > self.peak_balance {
            self.peak_balance = balance_after;
        }
    }

    /// Session loss as a positive number (zero when in profit).
    pub fn session_loss(&self) -> Decimal {
        (-self.total_profit).max(Decimal::ZERO)
    }

    /// Decline from the session peak balance, in percent.
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_balance <= Decimal::ZERO || self.current_balance >= self.peak_balance {
            Decimal::ZERO
        } else {
            (self.peak_balance - self.current_balance) / self.peak_balance * dec!(100)
        }
    }

    /// Win rate as a percentage. Zero when no trades were settled.
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(self.total_trades) * dec!(100)
        }
    }

    /// Reset every period counter whose interval has elapsed.
    pub fn roll_periods(&mut self, now: DateTime<Utc>) -> Vec<Period> {
        let mut rolled = Vec::new();
        if self.hourly.roll_if_elapsed(now, Period::Hourly.interval()) {
            rolled.push(Period::Hourly);
        }
        if self.daily.roll_if_elapsed(now, Period::Daily.interval()) {
            rolled.push(Period::Daily);
        }
        if self.weekly.roll_if_elapsed(now, Period::Weekly.interval()) {
            rolled.push(Period::Weekly);
        }
        rolled
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for STAKEFLOW.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BotError {
    #[error("Configuration invalid: {0}")]
    ConfigValidation(String),

    #[error("Invalid strategy description: {0}")]
    InvalidStrategy(String),

    #[error("Trade execution failed: {0}")]
    Execution(String),

    #[error("Risk limit hit: {0}")]
    RiskLimit(String),

    #[error("Circuit breaker tripped: {0}")]
    CircuitBreaker(String),

    #[error("Emergency stop: {0}")]
    EmergencyStop(String),

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("No trade executor bound")]
    NoExecutor,

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: BotStatus, action: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
