//! Configuration loading from TOML.
//!
//! `AppConfig` is what the binary reads from `config.toml`: runner paths,
//! the dashboard, the paper executor and one `BotConfiguration`. The bot
//! configuration is also the persisted shape of a bot and serializes back
//! to exactly what it was built from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use crate::engine::executor::PaperSettings;
use crate::risk::rapid_loss::RapidLossSettings;
use crate::risk::schedule::ScheduleSettings;
use crate::risk::RiskSettings;
use crate::strategy::planner::{PlannerOverrides, StepTemplate, StrategyDescription};
use crate::strategy::recovery::{RecoveryMode, RecoverySettings};
use crate::strategy::{CompoundingSettings, StrategySettings};
use crate::types::{Basis, BotError, ContractType, DurationUnit, TradeType};

// ---------------------------------------------------------------------------
// Application config
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub paper: PaperSettings,
    pub bot: BotConfiguration,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_name")]
    pub name: String,
    #[serde(default = "default_statistics_path")]
    pub statistics_path: String,
    #[serde(default = "default_configuration_path")]
    pub configuration_path: String,
    /// How often the binary logs a status line.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_runner_name() -> String {
    "STAKEFLOW-001".to_string()
}

fn default_statistics_path() -> String {
    "stakeflow_statistics.json".to_string()
}

fn default_configuration_path() -> String {
    "stakeflow_bot.json".to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: default_runner_name(),
            statistics_path: default_statistics_path(),
            configuration_path: default_configuration_path(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DashboardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_dashboard_port() -> u16 {
    8080
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_dashboard_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Bot configuration
// ---------------------------------------------------------------------------

/// Everything that defines one bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfiguration {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub market: MarketSettings,
    pub amounts: AmountSettings,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub rapid_loss: RapidLossSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub compounding: CompoundingSettings,
    /// Delay between a settled trade and the next tick.
    #[serde(default = "default_trade_interval_ms")]
    pub trade_interval_ms: u64,
    /// Trade results kept in memory.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_trade_interval_ms() -> u64 {
    1_000
}

fn default_max_history() -> usize {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettings {
    pub symbol: String,
    pub contract_type: ContractType,
    pub trade_type: TradeType,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_duration_unit")]
    pub duration_unit: DurationUnit,
    /// Last-digit prediction for digit contracts.
    #[serde(default)]
    pub prediction: Option<u8>,
    #[serde(default)]
    pub multiplier: Option<Decimal>,
    #[serde(default)]
    pub allow_equals: bool,
    #[serde(default)]
    pub basis: Basis,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub alternation: AlternationSettings,
}

fn default_duration() -> u32 {
    5
}

fn default_duration_unit() -> DurationUnit {
    DurationUnit::Ticks
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Switch between two trade types every N trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternationSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to the other side of the contract.
    #[serde(default)]
    pub secondary: Option<TradeType>,
    #[serde(default = "default_every_trades")]
    pub every_trades: u32,
}

fn default_every_trades() -> u32 {
    1
}

impl Default for AlternationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            secondary: None,
            every_trades: default_every_trades(),
        }
    }
}

impl MarketSettings {
    fn secondary_trade_type(&self) -> TradeType {
        self.alternation.secondary.unwrap_or_else(|| {
            let (a, b) = self.contract_type.sides();
            if self.trade_type == a {
                b
            } else {
                a
            }
        })
    }

    /// Trade type for the trade after `completed` settled trades.
    pub fn resolve_trade_type(&self, completed: u32) -> TradeType {
        if !self.alternation.enabled {
            return self.trade_type;
        }
        let block = completed / self.alternation.every_trades.max(1);
        if block % 2 == 0 {
            self.trade_type
        } else {
            self.secondary_trade_type()
        }
    }

    pub fn template(&self) -> StepTemplate {
        StepTemplate {
            contract_type: self.contract_type,
            trade_type: self.trade_type,
            duration: self.duration,
            duration_unit: self.duration_unit,
        }
    }

    pub fn validate(&self) -> Result<(), BotError> {
        if self.symbol.trim().is_empty() {
            return Err(BotError::ConfigValidation("market symbol is required".into()));
        }
        if !self.contract_type.allows(self.trade_type) {
            return Err(BotError::ConfigValidation(format!(
                "trade type {} does not belong to {}",
                self.trade_type, self.contract_type
            )));
        }
        if self.alternation.enabled && !self.contract_type.allows(self.secondary_trade_type()) {
            return Err(BotError::ConfigValidation(format!(
                "alternate trade type {} does not belong to {}",
                self.secondary_trade_type(),
                self.contract_type
            )));
        }
        if self.contract_type.requires_prediction() {
            match self.prediction {
                Some(d) if d <= 9 => {}
                Some(d) => {
                    return Err(BotError::ConfigValidation(format!(
                        "prediction must be a digit 0-9, got {d}"
                    )))
                }
                None => {
                    return Err(BotError::ConfigValidation(format!(
                        "{} requires a prediction",
                        self.contract_type
                    )))
                }
            }
        }
        if self.contract_type.requires_multiplier()
            && !matches!(self.multiplier, Some(m) if m > Decimal::ZERO)
        {
            return Err(BotError::ConfigValidation(
                "multiplier contracts require a positive multiplier".into(),
            ));
        }
        if self.duration == 0 {
            return Err(BotError::ConfigValidation("duration must be positive".into()));
        }
        if self.currency.trim().is_empty() {
            return Err(BotError::ConfigValidation("currency is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountSettings {
    pub base_stake: Decimal,
    #[serde(default = "default_max_stake")]
    pub max_stake: Decimal,
    /// Stop once the session has lost this much.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Stop once the session has earned this much.
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Balance to assume when no balance provider answers.
    #[serde(default)]
    pub initial_balance: Option<Decimal>,
}

fn default_max_stake() -> Decimal {
    dec!(1000)
}

impl AmountSettings {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.base_stake <= Decimal::ZERO {
            return Err(BotError::ConfigValidation(format!(
                "base stake must be positive, got {}",
                self.base_stake
            )));
        }
        if self.max_stake < self.base_stake {
            return Err(BotError::ConfigValidation(format!(
                "max stake {} is below base stake {}",
                self.max_stake, self.base_stake
            )));
        }
        for (name, value) in [("stop_loss", self.stop_loss), ("take_profit", self.take_profit)] {
            if matches!(value, Some(v) if v <= Decimal::ZERO) {
                return Err(BotError::ConfigValidation(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

impl BotConfiguration {
    /// A configuration with default settings for everything but the
    /// market and base stake.
    pub fn new(name: &str, market: MarketSettings, base_stake: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
            market,
            amounts: AmountSettings {
                base_stake,
                max_stake: default_max_stake().max(base_stake),
                stop_loss: None,
                take_profit: None,
                initial_balance: None,
            },
            strategy: StrategySettings::default(),
            recovery: RecoverySettings::default(),
            risk: RiskSettings::default(),
            rapid_loss: RapidLossSettings::default(),
            schedule: ScheduleSettings::default(),
            compounding: CompoundingSettings::default(),
            trade_interval_ms: default_trade_interval_ms(),
            max_history: default_max_history(),
        }
    }

    /// Everything `start()` checks before arming any timer.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.name.trim().is_empty() {
            return Err(BotError::ConfigValidation("bot name is required".into()));
        }
        self.market.validate()?;
        self.amounts.validate()?;
        self.strategy.validate()?;
        self.recovery.validate()?;
        self.risk.validate()?;
        self.rapid_loss.validate()?;
        self.schedule.validate()?;
        if self.compounding.enabled && self.compounding.balance_pct <= Decimal::ZERO {
            return Err(BotError::ConfigValidation(
                "compounding balance_pct must be positive".into(),
            ));
        }
        if self.max_history == 0 {
            return Err(BotError::ConfigValidation("max_history must be positive".into()));
        }
        if let Some(description) = &self.recovery.description {
            for step in &description.steps {
                if !step.contract_type.allows(step.trade_type) {
                    return Err(BotError::InvalidStrategy(format!(
                        "recovery step {} does not belong to {}",
                        step.trade_type, step.contract_type
                    )));
                }
                if step.contract_type.requires_prediction() && self.market.prediction.is_none() {
                    return Err(BotError::InvalidStrategy(format!(
                        "recovery step {} needs a market prediction",
                        step.contract_type
                    )));
                }
                if step.contract_type.requires_multiplier() && self.market.multiplier.is_none() {
                    return Err(BotError::InvalidStrategy(format!(
                        "recovery step {} needs a market multiplier",
                        step.contract_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Recovery plan to precompute: the configured description, or the
    /// bot's own contract repeated up to the consecutive-loss limit.
    pub fn recovery_description(&self) -> StrategyDescription {
        let mut description = self.recovery.description.clone().unwrap_or_else(|| {
            StrategyDescription::single(
                &self.name,
                self.market.template(),
                self.risk.max_consecutive_losses.max(1),
            )
        });
        if self.recovery.mode == RecoveryMode::Aggressive {
            if let Some(meta) = description.metadata.as_mut() {
                meta.aggressive = true;
            }
        }
        description
    }

    pub fn planner_overrides(&self) -> PlannerOverrides {
        PlannerOverrides {
            max_stake: Some(self.amounts.max_stake),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
