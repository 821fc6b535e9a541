//! Fixed-sequence systems (1-3-2-6 and custom sequences).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{StakeContext, StakeOutcome, TradeOutcome};
use crate::types::{BotError, StrategyCounters};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSettings {
    /// Stake multiples of the base stake, walked one step per win.
    #[serde(default = "default_sequence")]
    pub sequence: Vec<Decimal>,
    #[serde(default = "default_true")]
    pub reset_on_loss: bool,
    #[serde(default)]
    pub stop_on_completion: bool,
    #[serde(default)]
    pub max_cycles: Option<u32>,
}

fn default_sequence() -> Vec<Decimal> {
    vec![dec!(1), dec!(3), dec!(2), dec!(6)]
}

fn default_true() -> bool {
    true
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            sequence: default_sequence(),
            reset_on_loss: true,
            stop_on_completion: false,
            max_cycles: None,
        }
    }
}

impl SequenceSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.sequence.is_empty() {
            return Err(BotError::InvalidStrategy("sequence cannot be empty".into()));
        }
        if let Some(bad) = self.sequence.iter().find(|m| **m <= Decimal::ZERO) {
            return Err(BotError::InvalidStrategy(format!(
                "sequence entries must be positive, got {bad}"
            )));
        }
        if self.max_cycles == Some(0) {
            return Err(BotError::InvalidStrategy("max_cycles must be at least 1".into()));
        }
        Ok(())
    }
}

pub fn sequence(
    s: &SequenceSettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    let mut c = counters.advanced(outcome);
    let mut notices = Vec::new();
    let mut halt = None;

    match outcome {
        Some(o) if o.won => {
            c.sequence_step += 1;
            if c.sequence_step >= s.sequence.len() {
                c.completed_cycles += 1;
                c.sequence_step = 0;
                c.restart_progression();
                notices.push(format!("Sequence cycle {} completed", c.completed_cycles));
                if s.stop_on_completion {
                    halt = Some("Sequence completed".to_string());
                } else if matches!(s.max_cycles, Some(max) if c.completed_cycles >= max) {
                    halt = Some(format!("Maximum sequence cycles reached ({})", c.completed_cycles));
                }
            }
        }
        Some(_) if s.reset_on_loss => {
            c.sequence_step = 0;
            c.restart_progression();
        }
        _ => {}
    }

    let multiple = s
        .sequence
        .get(c.sequence_step)
        .copied()
        .unwrap_or(Decimal::ONE);
    let mut out = StakeOutcome::new(c, ctx.base_stake * multiple);
    for n in notices {
        out.notice(n);
    }
    out.halt = halt;
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::run;
    use crate::strategy::StrategySettings;

    fn win() -> TradeOutcome {
        TradeOutcome::win(dec!(1), dec!(0.95))
    }

    fn loss() -> TradeOutcome {
        TradeOutcome::loss(dec!(1))
    }

    #[test]
    fn test_walks_sequence_on_wins() {
        let settings = StrategySettings::Sequence1326(SequenceSettings::default());
        let (stakes, out) = run(&settings, dec!(10), &[win(), win(), win(), win()]);
        assert_eq!(
            stakes,
            vec![dec!(10), dec!(30), dec!(20), dec!(60), dec!(10)]
        );
        assert_eq!(out.counters.completed_cycles, 1);
        assert_eq!(out.notices.len(), 1);
        assert!(out.halt.is_none());
    }

    #[test]
    fn test_loss_resets_to_start() {
        let settings = StrategySettings::Sequence1326(SequenceSettings::default());
        let (stakes, _) = run(&settings, dec!(10), &[win(), win(), loss()]);
        assert_eq!(stakes[3], dec!(10));
    }

    #[test]
    fn test_loss_holds_when_reset_disabled() {
        let settings = StrategySettings::Sequence1326(SequenceSettings {
            reset_on_loss: false,
            ..Default::default()
        });
        let (stakes, _) = run(&settings, dec!(10), &[win(), loss()]);
        assert_eq!(stakes[2], dec!(30));
    }

    #[test]
    fn test_stop_on_completion() {
        let settings = StrategySettings::Sequence1326(SequenceSettings {
            sequence: vec![dec!(1), dec!(2)],
            stop_on_completion: true,
            ..Default::default()
        });
        let (_, out) = run(&settings, dec!(10), &[win(), win()]);
        assert_eq!(out.halt.as_deref(), Some("Sequence completed"));
    }

    #[test]
    fn test_max_cycles_cap() {
        let settings = StrategySettings::Sequence1326(SequenceSettings {
            sequence: vec![dec!(1)],
            max_cycles: Some(2),
            ..Default::default()
        });
        let (_, out) = run(&settings, dec!(10), &[win()]);
        assert!(out.halt.is_none());
        let (_, out) = run(&settings, dec!(10), &[win(), win()]);
        assert!(out.halt.is_some());
    }

    #[test]
    fn test_validation() {
        let bad = SequenceSettings {
            sequence: vec![],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = SequenceSettings {
            sequence: vec![dec!(1), dec!(0)],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
