//! D'Alembert family: unit counters that climb on one outcome and fall on
//! the other, with periodic-reset and adaptive variants.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{StakeContext, StakeOutcome, TradeOutcome};
use crate::types::{BotError, StrategyCounters};

const ADAPTIVE_MIN_SAMPLE: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DalembertSettings {
    #[serde(default = "one")]
    pub increment: u32,
    #[serde(default = "one")]
    pub decrement: u32,
    #[serde(default = "one")]
    pub start_units: u32,
    #[serde(default = "default_max_units")]
    pub max_units: u32,
    /// Halve the increment (never below one unit).
    #[serde(default)]
    pub conservative: bool,
    /// Session profit at which units drop back to one.
    #[serde(default)]
    pub profit_threshold: Option<Decimal>,
}

fn one() -> u32 {
    1
}

fn default_max_units() -> u32 {
    10
}

impl Default for DalembertSettings {
    fn default() -> Self {
        Self {
            increment: 1,
            decrement: 1,
            start_units: 1,
            max_units: default_max_units(),
            conservative: false,
            profit_threshold: None,
        }
    }
}

impl DalembertSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.max_units == 0 {
            return Err(BotError::InvalidStrategy("max_units must be at least 1".into()));
        }
        if self.start_units == 0 || self.start_units > self.max_units {
            return Err(BotError::InvalidStrategy(format!(
                "start_units must be within 1..={}, got {}",
                self.max_units, self.start_units
            )));
        }
        if self.increment == 0 {
            return Err(BotError::InvalidStrategy("increment must be at least 1".into()));
        }
        Ok(())
    }

    fn step_up(&self) -> u32 {
        if self.conservative {
            (self.increment / 2).max(1)
        } else {
            self.increment
        }
    }

    fn raise(&self, units: u32) -> u32 {
        units.saturating_add(self.step_up()).min(self.max_units)
    }

    fn lower(&self, units: u32) -> u32 {
        units.saturating_sub(self.decrement).max(1)
    }

    fn start(&self) -> u32 {
        self.start_units.clamp(1, self.max_units.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DalembertResetSettings {
    #[serde(default)]
    pub progression: DalembertSettings,
    #[serde(default = "default_reset_every")]
    pub reset_every_trades: u32,
    /// Scale the stake by recent win rate once the sample is large enough.
    #[serde(default)]
    pub adaptive: bool,
}

fn default_reset_every() -> u32 {
    10
}

impl Default for DalembertResetSettings {
    fn default() -> Self {
        Self {
            progression: DalembertSettings::default(),
            reset_every_trades: default_reset_every(),
            adaptive: false,
        }
    }
}

impl DalembertResetSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        self.progression.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseDalembertResetSettings {
    #[serde(default)]
    pub progression: DalembertSettings,
    #[serde(default = "default_reset_every")]
    pub reset_every_trades: u32,
    #[serde(default)]
    pub profit_target: Option<Decimal>,
}

impl Default for ReverseDalembertResetSettings {
    fn default() -> Self {
        Self {
            progression: DalembertSettings::default(),
            reset_every_trades: default_reset_every(),
            profit_target: None,
        }
    }
}

impl ReverseDalembertResetSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        self.progression.validate()?;
        if matches!(self.profit_target, Some(t) if t <= Decimal::ZERO) {
            return Err(BotError::InvalidStrategy("profit_target must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progressions
// ---------------------------------------------------------------------------

/// Add units after a loss, remove them after a win.
pub fn dalembert(
    s: &DalembertSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    progress(s, counters, outcome, ctx, false)
}

/// Add units after a win, remove them after a loss.
pub fn reverse_dalembert(
    s: &DalembertSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    progress(s, counters, outcome, ctx, true)
}

fn progress(
    s: &DalembertSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
    reverse: bool,
) -> StakeOutcome {
    let mut c = counters.advanced(outcome);
    let mut notices = Vec::new();
    match outcome {
        None => c.dalembert_units = s.start(),
        Some(o) => {
            let climb = o.won == reverse;
            c.dalembert_units = if climb {
                s.raise(c.dalembert_units)
            } else {
                s.lower(c.dalembert_units)
            };
            if let Some(threshold) = s.profit_threshold {
                if ctx.session_profit >= threshold && c.dalembert_units > 1 {
                    c.dalembert_units = 1;
                    c.restart_progression();
                    notices.push(format!(
                        "D'Alembert profit threshold {threshold:.2} reached, units reset"
                    ));
                }
            }
        }
    }
    let stake = ctx.base_stake * Decimal::from(c.dalembert_units);
    let mut out = StakeOutcome::new(c, stake);
    for n in notices {
        out.notice(n);
    }
    out
}

/// D'Alembert with a forced reset every N trades and optional win-rate
/// scaling.
pub fn dalembert_reset(
    s: &DalembertResetSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut out = dalembert(&s.progression, counters, outcome, ctx);
    periodic_reset(&s.progression, s.reset_every_trades, &mut out, ctx);
    if s.adaptive {
        if let Some(rate) = ctx.win_rate_over(ADAPTIVE_MIN_SAMPLE) {
            if rate >= dec!(60) {
                out.stake *= dec!(1.2);
            } else if rate <= dec!(40) {
                out.stake *= dec!(0.8);
            }
        }
    }
    out
}

/// Reverse D'Alembert with a forced reset every N trades or at a profit
/// target.
pub fn reverse_dalembert_reset(
    s: &ReverseDalembertResetSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut out = reverse_dalembert(&s.progression, counters, outcome, ctx);
    if !periodic_reset(&s.progression, s.reset_every_trades, &mut out, ctx) {
        if let Some(target) = s.profit_target {
            if out.counters.progression_profit >= target {
                out.counters.dalembert_units = s.progression.start();
                out.counters.force_reset();
                out.stake = ctx.base_stake * Decimal::from(out.counters.dalembert_units);
                out.notice(format!("Reverse D'Alembert profit target {target:.2} reached"));
            }
        }
    }
    out
}

fn periodic_reset(
    s: &DalembertSettings,
    every: u32,
    out: &mut StakeOutcome,
    ctx: &StakeContext,
) -> bool {
    if every == 0 || out.counters.trades_since_reset < every {
        return false;
    }
    out.counters.dalembert_units = s.start();
    out.counters.force_reset();
    out.stake = ctx.base_stake * Decimal::from(out.counters.dalembert_units);
    out.notice(format!("D'Alembert periodic reset after {every} trades"));
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
