//! Recovery controller.
//!
//! Tracks whether the bot is recouping losses and which precomputed
//! recovery step it is on. Pure state machine: the lifecycle controller
//! feeds it settled results and turns the returned transitions into
//! notifications and timers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::planner::StrategyDescription;
use crate::amount::saturating_mul;
use crate::types::{BotError, StrategyStep};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    #[default]
    Off,
    Standard,
    /// Recovery steps are planned without the dynamic-risk scaling.
    Aggressive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default)]
    pub mode: RecoveryMode,
    /// Walk further down the plan on repeated losses and only leave
    /// recovery once the losses are recouped.
    #[serde(default)]
    pub progressive: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_recovery_multiplier")]
    pub recovery_multiplier: Decimal,
    /// Pause after exhausting attempts (0 disables).
    #[serde(default)]
    pub cooldown_ms: u64,
    /// Restart the bot when the recovery cooldown ends.
    #[serde(default)]
    pub auto_resume: bool,
    /// Custom recovery plan. Defaults to repeating the bot's own contract.
    #[serde(default)]
    pub description: Option<StrategyDescription>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_recovery_multiplier() -> Decimal {
    dec!(1)
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::Off,
            progressive: false,
            max_attempts: default_max_attempts(),
            recovery_multiplier: default_recovery_multiplier(),
            cooldown_ms: 0,
            auto_resume: false,
            description: None,
        }
    }
}

impl RecoverySettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.recovery_multiplier <= Decimal::ZERO {
            return Err(BotError::ConfigValidation(
                "recovery_multiplier must be positive".into(),
            ));
        }
        if self.mode != RecoveryMode::Off && self.max_attempts == 0 {
            return Err(BotError::ConfigValidation(
                "recovery max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.mode != RecoveryMode::Off
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub recovering: bool,
    pub step_index: usize,
    pub attempts: u32,
    /// Net result of trades since recovery was entered, including the
    /// loss that triggered it.
    pub recovery_pnl: Decimal,
    /// Recovery attempts were exhausted and the cooldown has not ended.
    pub cooling_down: bool,
}

/// What changed after feeding a result to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryTransition {
    Triggered { step_index: usize },
    StepChanged { from: usize, to: usize },
    Recovered { pnl: Decimal },
    /// Attempts ran out. `cooldown_ms` is set when a cooldown must start.
    Exhausted { attempts: u32, cooldown_ms: Option<u64> },
}

impl fmt::Display for RecoveryTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryTransition::Triggered { step_index } => {
                write!(f, "Recovery triggered at step {step_index}")
            }
            RecoveryTransition::StepChanged { from, to } => {
                write!(f, "Recovery step {from} -> {to}")
            }
            RecoveryTransition::Recovered { pnl } => {
                write!(f, "Recovery complete ({pnl:+.2})")
            }
            RecoveryTransition::Exhausted { attempts, .. } => {
                write!(f, "Recovery attempts exhausted after {attempts}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryController {
    settings: RecoverySettings,
    state: RecoveryState,
}

impl RecoveryController {
    pub fn new(settings: RecoverySettings) -> Self {
        Self {
            settings,
            state: RecoveryState::default(),
        }
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    pub fn is_recovering(&self) -> bool {
        self.state.recovering
    }

    pub fn set_settings(&mut self, settings: RecoverySettings) {
        self.settings = settings;
    }

    pub fn reset(&mut self) {
        self.state = RecoveryState::default();
    }

    /// Keep the step index inside a (possibly shorter) new plan.
    pub fn clamp_to(&mut self, step_count: usize) {
        if step_count == 0 {
            self.state.step_index = 0;
            self.state.recovering = false;
        } else {
            self.state.step_index = self.state.step_index.min(step_count - 1);
        }
    }

    pub fn on_loss(&mut self, profit: Decimal, step_count: usize) -> Option<RecoveryTransition> {
        if !self.settings.enabled() || step_count == 0 {
            return None;
        }
        let last = step_count - 1;
        self.state.attempts += 1;

        if self.state.attempts > self.settings.max_attempts {
            let attempts = self.state.attempts;
            let cooldown_ms = (self.settings.cooldown_ms > 0).then_some(self.settings.cooldown_ms);
            self.state.recovering = false;
            self.state.step_index = 0;
            self.state.recovery_pnl = Decimal::ZERO;
            if cooldown_ms.is_some() {
                self.state.cooling_down = true;
            } else {
                self.state.attempts = 0;
            }
            return Some(RecoveryTransition::Exhausted {
                attempts,
                cooldown_ms,
            });
        }

        if !self.state.recovering {
            self.state.recovering = true;
            self.state.step_index = 1.min(last);
            self.state.recovery_pnl = profit;
            return Some(RecoveryTransition::Triggered {
                step_index: self.state.step_index,
            });
        }

        self.state.recovery_pnl += profit;
        if self.settings.progressive {
            let from = self.state.step_index;
            let to = (from + 1).min(last);
            if to != from {
                self.state.step_index = to;
                return Some(RecoveryTransition::StepChanged { from, to });
            }
        }
        None
    }

    pub fn on_win(&mut self, profit: Decimal) -> Option<RecoveryTransition> {
        if !self.state.recovering {
            return None;
        }
        self.state.recovery_pnl += profit;
        if self.settings.progressive && self.state.recovery_pnl < Decimal::ZERO {
            return None;
        }
        let pnl = self.state.recovery_pnl;
        self.state.recovering = false;
        self.state.step_index = 0;
        self.state.attempts = 0;
        self.state.recovery_pnl = Decimal::ZERO;
        Some(RecoveryTransition::Recovered { pnl })
    }

    /// The recovery cooldown elapsed: attempts start over.
    pub fn end_cooldown(&mut self) {
        self.state.cooling_down = false;
        self.state.attempts = 0;
    }

    /// Step to trade while recovering.
    pub fn current_step<'a>(&self, steps: &'a [StrategyStep]) -> Option<&'a StrategyStep> {
        if self.state.recovering {
            steps.get(self.state.step_index)
        } else {
            None
        }
    }

    /// `base × step multiplier × recovery multiplier`, while recovering.
    pub fn recovery_stake(&self, base_stake: Decimal, steps: &[StrategyStep]) -> Option<Decimal> {
        self.current_step(steps)
            .map(|step| {
                saturating_mul(
                    saturating_mul(base_stake, step.multiplier),
                    self.settings.recovery_multiplier,
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
