//! Martingale family: classic, periodic-reset, reverse (anti-Martingale)
//! and reverse with reset.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{StakeContext, StakeOutcome, TradeOutcome};
use crate::amount::{percent_of, powu, saturating_mul};
use crate::types::{BotError, StrategyCounters};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MartingaleSettings {
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Highest exponent the progression may reach.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Cap the stake at this percentage of the balance.
    #[serde(default)]
    pub max_balance_pct: Option<Decimal>,
    /// Only return to base on a win that leaves the progression in profit.
    #[serde(default)]
    pub reset_on_profit: bool,
}

fn default_multiplier() -> Decimal {
    dec!(2)
}

fn default_max_steps() -> u32 {
    6
}

impl Default for MartingaleSettings {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            max_steps: default_max_steps(),
            max_balance_pct: None,
            reset_on_profit: false,
        }
    }
}

impl MartingaleSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.multiplier <= Decimal::ZERO {
            return Err(BotError::InvalidStrategy(format!(
                "martingale multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        if let Some(pct) = self.max_balance_pct {
            if pct <= Decimal::ZERO || pct > dec!(100) {
                return Err(BotError::InvalidStrategy(format!(
                    "max_balance_pct must be within (0, 100], got {pct}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MartingaleResetSettings {
    #[serde(default)]
    pub progression: MartingaleSettings,
    /// Force a full reset every N trades (0 disables).
    #[serde(default = "default_reset_every")]
    pub reset_every_trades: u32,
    /// Extra percentage added to the base stake on the reset trade.
    #[serde(default)]
    pub reset_surcharge_pct: Decimal,
}

fn default_reset_every() -> u32 {
    10
}

impl Default for MartingaleResetSettings {
    fn default() -> Self {
        Self {
            progression: MartingaleSettings::default(),
            reset_every_trades: default_reset_every(),
            reset_surcharge_pct: Decimal::ZERO,
        }
    }
}

impl MartingaleResetSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        self.progression.validate()?;
        if self.reset_surcharge_pct < Decimal::ZERO {
            return Err(BotError::InvalidStrategy(
                "reset_surcharge_pct cannot be negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseMartingaleSettings {
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    #[serde(default = "default_reverse_max_steps")]
    pub max_steps: u32,
    /// Risk at most this share of the accumulated streak profit.
    #[serde(default)]
    pub profit_lock_pct: Option<Decimal>,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_aggressive_multiplier")]
    pub aggressive_multiplier: Decimal,
}

fn default_reverse_max_steps() -> u32 {
    3
}

fn default_aggressive_multiplier() -> Decimal {
    dec!(1.5)
}

impl Default for ReverseMartingaleSettings {
    fn default() -> Self {
        Self {
            multiplier: default_multiplier(),
            max_steps: default_reverse_max_steps(),
            profit_lock_pct: None,
            aggressive: false,
            aggressive_multiplier: default_aggressive_multiplier(),
        }
    }
}

impl ReverseMartingaleSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.multiplier <= Decimal::ZERO || self.aggressive_multiplier <= Decimal::ZERO {
            return Err(BotError::InvalidStrategy(
                "reverse martingale multipliers must be positive".into(),
            ));
        }
        if let Some(pct) = self.profit_lock_pct {
            if pct < Decimal::ZERO || pct > dec!(100) {
                return Err(BotError::InvalidStrategy(format!(
                    "profit_lock_pct must be within [0, 100], got {pct}"
                )));
            }
        }
        Ok(())
    }

    fn effective_multiplier(&self) -> Decimal {
        if self.aggressive {
            saturating_mul(self.multiplier, self.aggressive_multiplier)
        } else {
            self.multiplier
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseMartingaleResetSettings {
    #[serde(default)]
    pub progression: ReverseMartingaleSettings,
    /// Return to base after this many wins (0 disables).
    #[serde(default = "default_reset_after_wins")]
    pub reset_after_wins: u32,
    /// Return to base once the streak has earned this much.
    #[serde(default)]
    pub profit_target: Option<Decimal>,
}

fn default_reset_after_wins() -> u32 {
    3
}

impl Default for ReverseMartingaleResetSettings {
    fn default() -> Self {
        Self {
            progression: ReverseMartingaleSettings::default(),
            reset_after_wins: default_reset_after_wins(),
            profit_target: None,
        }
    }
}

impl ReverseMartingaleResetSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        self.progression.validate()?;
        if matches!(self.profit_target, Some(t) if t <= Decimal::ZERO) {
            return Err(BotError::InvalidStrategy(
                "profit_target must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progressions
// ---------------------------------------------------------------------------

/// Double (by `multiplier`) after every loss, back to base after a win.
pub fn martingale(
    s: &MartingaleSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut c = counters.advanced(outcome);
    if let Some(o) = outcome {
        if o.won {
            if !s.reset_on_profit || c.progression_profit > Decimal::ZERO {
                c.martingale_step = 0;
                c.restart_progression();
            }
        } else {
            c.martingale_step = (c.martingale_step + 1).min(s.max_steps);
        }
    }
    let stake = martingale_stake(s, &c, ctx);
    StakeOutcome::new(c, stake)
}

fn martingale_stake(s: &MartingaleSettings, c: &StrategyCounters, ctx: &StakeContext) -> Decimal {
    let stake = saturating_mul(
        ctx.base_stake,
        powu(s.multiplier, c.martingale_step.min(s.max_steps)),
    );
    match s.max_balance_pct {
        Some(pct) => stake.min(percent_of(ctx.balance, pct)),
        None => stake,
    }
}

/// Martingale with a forced return to base every `reset_every_trades`.
pub fn martingale_reset(
    s: &MartingaleResetSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut out = martingale(&s.progression, counters, outcome, ctx);
    if s.reset_every_trades > 0 && out.counters.trades_since_reset >= s.reset_every_trades {
        out.counters.martingale_step = 0;
        out.counters.force_reset();
        out.stake = ctx.base_stake + percent_of(ctx.base_stake, s.reset_surcharge_pct);
        out.notice(format!(
            "Martingale periodic reset after {} trades",
            s.reset_every_trades
        ));
    }
    out
}

/// Press winning streaks: the step follows consecutive wins and drops to
/// zero on any loss.
pub fn reverse_martingale(
    s: &ReverseMartingaleSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut c = counters.advanced(outcome);
    if let Some(o) = outcome {
        if o.won {
            c.martingale_step = (c.martingale_step + 1).min(s.max_steps);
        } else {
            c.martingale_step = 0;
            c.restart_progression();
        }
    }
    let stake = reverse_stake(s, &c, ctx);
    StakeOutcome::new(c, stake)
}

fn reverse_stake(
    s: &ReverseMartingaleSettings,
    c: &StrategyCounters,
    ctx: &StakeContext,
) -> Decimal {
    let stake = saturating_mul(ctx.base_stake, powu(s.effective_multiplier(), c.martingale_step));
    match s.profit_lock_pct {
        Some(pct) if c.martingale_step > 0 => {
            let at_risk = percent_of(c.progression_profit.max(Decimal::ZERO), pct);
            stake.min(ctx.base_stake + at_risk)
        }
        _ => stake,
    }
}

/// Reverse Martingale that banks the streak after N wins or a profit target.
pub fn reverse_martingale_reset(
    s: &ReverseMartingaleResetSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut out = reverse_martingale(&s.progression, counters, outcome, ctx);
    let wins_hit = s.reset_after_wins > 0 && out.counters.wins_since_reset >= s.reset_after_wins;
    let target_hit = matches!(s.profit_target, Some(t) if out.counters.progression_profit >= t);
    if wins_hit || target_hit {
        let reason = if wins_hit {
            format!("Reverse Martingale reset after {} wins", out.counters.wins_since_reset)
        } else {
            format!(
                "Reverse Martingale profit target reached ({:.2})",
                out.counters.progression_profit
            )
        };
        out.counters.martingale_step = 0;
        out.counters.force_reset();
        out.stake = ctx.base_stake;
        out.notice(reason);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::clamp_stake;
    use crate::strategy::tests::run;
    use crate::strategy::StrategySettings;

    fn loss(stake: Decimal) -> TradeOutcome {
        TradeOutcome::loss(stake)
    }

    fn win(stake: Decimal) -> TradeOutcome {
        TradeOutcome::win(stake, stake * dec!(0.95))
    }

    #[test]
    fn test_martingale_three_losses_then_win() {
        let settings = StrategySettings::Martingale(MartingaleSettings::default());
        let (stakes, out) = run(
            &settings,
            dec!(10),
            &[loss(dec!(10)), loss(dec!(20)), loss(dec!(40)), win(dec!(80))],
        );
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(40), dec!(80), dec!(10)]);
        assert_eq!(out.counters.martingale_step, 0);
        assert!(out.notices.is_empty());
    }

    #[test]
    fn test_martingale_step_capped() {
        let settings = StrategySettings::Martingale(MartingaleSettings {
            max_steps: 2,
            ..Default::default()
        });
        let losses: Vec<_> = (0..5).map(|_| loss(dec!(1))).collect();
        let (stakes, out) = run(&settings, dec!(10), &losses);
        assert_eq!(*stakes.last().unwrap(), dec!(40));
        assert_eq!(out.counters.martingale_step, 2);
    }

    #[test]
    fn test_deep_progressions_saturate_instead_of_overflowing() {
        let settings = StrategySettings::Martingale(MartingaleSettings {
            multiplier: dec!(10),
            max_steps: 40,
            ..Default::default()
        });
        let losses: Vec<_> = (0..40).map(|_| loss(dec!(1))).collect();
        let (stakes, out) = run(&settings, dec!(10), &losses);
        assert_eq!(out.counters.martingale_step, 40);
        assert_eq!(out.stake, Decimal::MAX);
        assert!(stakes.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(clamp_stake(out.stake, dec!(10), dec!(500), None), dec!(500));

        let settings = StrategySettings::ReverseMartingale(ReverseMartingaleSettings {
            multiplier: dec!(10),
            max_steps: 40,
            aggressive: true,
            ..Default::default()
        });
        let wins: Vec<_> = (0..40).map(|_| win(dec!(1))).collect();
        let (_, out) = run(&settings, dec!(10), &wins);
        assert_eq!(out.stake, Decimal::MAX);
    }

    #[test]
    fn test_martingale_balance_cap() {
        let settings = StrategySettings::Martingale(MartingaleSettings {
            max_balance_pct: Some(dec!(3)),
            ..Default::default()
        });
        // Balance is 1000 in the test context, so the cap is 30.
        let (stakes, _) = run(&settings, dec!(10), &[loss(dec!(10)), loss(dec!(20))]);
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(30)]);
    }

    #[test]
    fn test_martingale_reset_on_profit_holds_step() {
        let settings = StrategySettings::Martingale(MartingaleSettings {
            reset_on_profit: true,
            ..Default::default()
        });
        // Loss of 10, loss of 20, then a tiny win that does not recoup.
        let tiny = TradeOutcome::win(dec!(40), dec!(1));
        let (stakes, out) = run(&settings, dec!(10), &[loss(dec!(10)), loss(dec!(20)), tiny]);
        assert_eq!(stakes[3], dec!(40));
        assert_eq!(out.counters.martingale_step, 2);

        let (stakes, _) = run(&settings, dec!(10), &[loss(dec!(10)), win(dec!(20))]);
        assert_eq!(stakes[2], dec!(10));
    }

    #[test]
    fn test_martingale_reset_every_n_trades_with_surcharge() {
        let settings = StrategySettings::MartingaleReset(MartingaleResetSettings {
            reset_every_trades: 3,
            reset_surcharge_pct: dec!(10),
            ..Default::default()
        });
        let (stakes, out) = run(
            &settings,
            dec!(10),
            &[loss(dec!(10)), loss(dec!(20)), loss(dec!(40))],
        );
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(40), dec!(11)]);
        assert_eq!(out.counters.martingale_step, 0);
        assert_eq!(out.counters.trades_since_reset, 0);
        assert_eq!(out.notices.len(), 1);
    }

    #[test]
    fn test_reverse_martingale_follows_wins() {
        let settings = StrategySettings::ReverseMartingale(ReverseMartingaleSettings::default());
        let (stakes, out) = run(
            &settings,
            dec!(10),
            &[win(dec!(10)), win(dec!(20)), loss(dec!(40))],
        );
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(40), dec!(10)]);
        assert_eq!(out.counters.martingale_step, 0);
        assert_eq!(out.counters.progression_profit, Decimal::ZERO);
    }

    #[test]
    fn test_reverse_martingale_aggressive() {
        let settings = StrategySettings::ReverseMartingale(ReverseMartingaleSettings {
            aggressive: true,
            ..Default::default()
        });
        let (stakes, _) = run(&settings, dec!(10), &[win(dec!(10))]);
        assert_eq!(stakes[1], dec!(30));
    }

    #[test]
    fn test_reverse_martingale_profit_lock() {
        let settings = StrategySettings::ReverseMartingale(ReverseMartingaleSettings {
            profit_lock_pct: Some(dec!(50)),
            ..Default::default()
        });
        // One win of 9.5: risk base plus half of it.
        let (stakes, _) = run(&settings, dec!(10), &[win(dec!(10))]);
        assert_eq!(stakes[1], dec!(14.75));
    }

    #[test]
    fn test_reverse_martingale_reset_after_wins() {
        let settings = StrategySettings::ReverseMartingaleReset(ReverseMartingaleResetSettings {
            reset_after_wins: 2,
            ..Default::default()
        });
        let (stakes, out) = run(&settings, dec!(10), &[win(dec!(10)), win(dec!(20))]);
        assert_eq!(stakes, vec![dec!(10), dec!(20), dec!(10)]);
        assert_eq!(out.notices.len(), 1);
        assert_eq!(out.counters.wins_since_reset, 0);
    }

    #[test]
    fn test_reverse_martingale_reset_at_profit_target() {
        let settings = StrategySettings::ReverseMartingaleReset(ReverseMartingaleResetSettings {
            reset_after_wins: 0,
            profit_target: Some(dec!(9)),
            ..Default::default()
        });
        let (stakes, out) = run(&settings, dec!(10), &[win(dec!(10))]);
        assert_eq!(stakes[1], dec!(10));
        assert!(out.notices[0].reason.contains("profit target"));
    }

    #[test]
    fn test_validation() {
        let bad = MartingaleSettings {
            multiplier: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(BotError::InvalidStrategy(_))));
        let bad = ReverseMartingaleResetSettings {
            profit_target: Some(dec!(-1)),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
