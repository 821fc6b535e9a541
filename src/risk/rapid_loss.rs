//! Rapid-loss detector.
//!
//! Counts losses inside a sliding time window. Reaching the threshold
//! starts a cooldown that grows geometrically with every trigger:
//! `min(initial × multiplier^(n−1), max)`. The window is cleared on each
//! trigger, the trigger count is kept for the whole run.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::amount::{powu, saturating_mul};
use crate::types::BotError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RapidLossSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Losses inside the window that trigger a cooldown.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_initial_cooldown_ms")]
    pub initial_cooldown_ms: u64,
    /// Growth factor applied on every repeated trigger.
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_threshold() -> u32 {
    3
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_initial_cooldown_ms() -> u64 {
    60_000
}

fn default_multiplier() -> Decimal {
    dec!(2)
}

fn default_max_cooldown_ms() -> u64 {
    3_600_000
}

impl Default for RapidLossSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_threshold(),
            window_ms: default_window_ms(),
            initial_cooldown_ms: default_initial_cooldown_ms(),
            multiplier: default_multiplier(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl RapidLossSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if !self.enabled {
            return Ok(());
        }
        if self.threshold == 0 || self.window_ms == 0 {
            return Err(BotError::ConfigValidation(
                "rapid-loss threshold and window must be positive".into(),
            ));
        }
        if self.multiplier < Decimal::ONE {
            return Err(BotError::ConfigValidation(format!(
                "rapid-loss multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        if self.max_cooldown_ms < self.initial_cooldown_ms {
            return Err(BotError::ConfigValidation(
                "rapid-loss max cooldown is below the initial cooldown".into(),
            ));
        }
        Ok(())
    }

    /// Cooldown for the `trigger`-th trigger (1-based).
    pub fn cooldown_for(&self, trigger: u32) -> std::time::Duration {
        let grown = saturating_mul(
            Decimal::from(self.initial_cooldown_ms),
            powu(self.multiplier, trigger.saturating_sub(1)),
        );
        let capped = grown.min(Decimal::from(self.max_cooldown_ms));
        let ms = capped.to_u64().unwrap_or(self.max_cooldown_ms);
        std::time::Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RapidLossState {
    /// Loss timestamps inside the current window.
    pub recent_losses: VecDeque<DateTime<Utc>>,
    pub trigger_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RapidLossDetector {
    settings: RapidLossSettings,
    state: RapidLossState,
}

impl RapidLossDetector {
    pub fn new(settings: RapidLossSettings) -> Self {
        Self {
            settings,
            state: RapidLossState::default(),
        }
    }

    pub fn state(&self) -> &RapidLossState {
        &self.state
    }

    pub fn set_settings(&mut self, settings: RapidLossSettings) {
        self.settings = settings;
    }

    pub fn reset(&mut self) {
        self.state = RapidLossState::default();
    }

    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state.cooldown_until, Some(until) if now < until)
    }

    /// Record a loss at `now`. Returns the cooldown to apply when this
    /// loss trips the detector.
    pub fn record_loss(&mut self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        if !self.settings.enabled || self.is_cooling_down(now) {
            return None;
        }
        let window =
            Duration::milliseconds(i64::try_from(self.settings.window_ms).unwrap_or(i64::MAX));
        while let Some(oldest) = self.state.recent_losses.front() {
            if now - *oldest > window {
                self.state.recent_losses.pop_front();
            } else {
                break;
            }
        }
        self.state.recent_losses.push_back(now);

        if (self.state.recent_losses.len() as u32) < self.settings.threshold {
            return None;
        }

        self.state.trigger_count = self.state.trigger_count.saturating_add(1);
        self.state.recent_losses.clear();
        let cooldown = self.settings.cooldown_for(self.state.trigger_count);
        self.state.cooldown_until = Duration::from_std(cooldown).ok().map(|d| now + d);
        warn!(
            trigger = self.state.trigger_count,
            cooldown_ms = cooldown.as_millis() as u64,
            "Rapid-loss detector tripped"
        );
        Some(cooldown)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
