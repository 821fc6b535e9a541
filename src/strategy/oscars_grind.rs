//! Oscar's Grind: grind out one target unit of profit per cycle, raising
//! the bet by a unit after a win while the cycle is still short.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{StakeContext, StakeOutcome, TradeOutcome};
use crate::types::{BotError, StrategyCounters};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscarsGrindSettings {
    /// Cycle profit target, in base-stake units.
    #[serde(default = "default_target_units")]
    pub target_units: u32,
    #[serde(default = "default_max_units")]
    pub max_units: u32,
    /// Payout assumed before any win has been observed.
    #[serde(default = "default_expected_payout")]
    pub expected_payout_pct: Decimal,
    /// Ask the bot to stop when a cycle completes.
    #[serde(default)]
    pub auto_stop: bool,
    /// Start a fresh cycle when a cycle completes.
    #[serde(default = "default_true")]
    pub auto_reset: bool,
}

fn default_target_units() -> u32 {
    1
}

fn default_max_units() -> u32 {
    10
}

fn default_expected_payout() -> Decimal {
    dec!(95)
}

fn default_true() -> bool {
    true
}

impl Default for OscarsGrindSettings {
    fn default() -> Self {
        Self {
            target_units: default_target_units(),
            max_units: default_max_units(),
            expected_payout_pct: default_expected_payout(),
            auto_stop: false,
            auto_reset: true,
        }
    }
}

impl OscarsGrindSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.target_units == 0 || self.max_units == 0 {
            return Err(BotError::InvalidStrategy(
                "Oscar's Grind target_units and max_units must be at least 1".into(),
            ));
        }
        if self.expected_payout_pct <= Decimal::ZERO {
            return Err(BotError::InvalidStrategy(
                "expected_payout_pct must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn oscars_grind(
    s: &OscarsGrindSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut c = counters.advanced(outcome);
    let target = ctx.base_stake * Decimal::from(s.target_units);
    let mut completed = false;

    if let Some(o) = outcome {
        c.oscar_cycle_profit += o.profit;
        if o.won {
            if c.oscar_cycle_profit >= target {
                completed = true;
            } else {
                c.oscar_units = (c.oscar_units + 1).min(s.max_units);
            }
        }
    }

    let mut notices = Vec::new();
    let mut halt = None;
    if completed {
        c.completed_cycles += 1;
        notices.push(format!(
            "Oscar's Grind cycle {} complete ({:+.2})",
            c.completed_cycles, c.oscar_cycle_profit
        ));
        if s.auto_reset {
            c.oscar_units = 1;
            c.oscar_cycle_profit = Decimal::ZERO;
            c.restart_progression();
        }
        if s.auto_stop {
            halt = Some("Oscar's Grind cycle target reached".to_string());
        }
    }

    let ratio = outcome
        .and_then(TradeOutcome::payout_ratio)
        .unwrap_or(s.expected_payout_pct / dec!(100));
    let remaining = target - c.oscar_cycle_profit;
    let full = ctx.base_stake * Decimal::from(c.oscar_units);
    let stake = full.min(ctx.base_stake.max(remaining / ratio));

    let mut out = StakeOutcome::new(c, stake);
    for n in notices {
        out.notice(n);
    }
    out.halt = halt;
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
