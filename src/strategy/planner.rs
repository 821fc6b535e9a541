//! Recovery-step planner.
//!
//! Precomputes the ordered list of recovery steps a bot walks through
//! after consecutive losses. Each step sizes its stake to recoup the
//! cumulative loss so far plus the profit the first step would have made.
//! Pure and deterministic: the same description, base stake and overrides
//! always yield the same plan.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::amount::{percent_of, round2};
use crate::types::{BotError, ContractType, DurationUnit, StrategyStep, TradeType};

/// Stake ceiling used when no override is given.
pub const DEFAULT_MAX_STAKE: Decimal = dec!(1000000000);

/// Longest loss streak a plan may cover.
pub const MAX_CONSECUTIVE_LOSSES: u32 = 1_000;

/// Payouts never go below this, so no division by zero downstream.
const MIN_PAYOUT_PCT: Decimal = dec!(1);

/// Sub-unit stakes pay this many points less.
const SMALL_STAKE_PENALTY: Decimal = dec!(3);

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    pub name: String,
    pub max_consecutive_losses: u32,
    #[serde(default)]
    pub aggressive: bool,
}

/// Contract parameters for one recovery step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub contract_type: ContractType,
    pub trade_type: TradeType,
    pub duration: u32,
    pub duration_unit: DurationUnit,
}

/// Declarative recovery strategy: metadata plus contract templates. The
/// last template is reused for every step past the end of the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDescription {
    pub metadata: Option<StrategyMetadata>,
    #[serde(default)]
    pub steps: Vec<StepTemplate>,
}

impl StrategyDescription {
    /// A one-template description that repeats the bot's own contract.
    pub fn single(name: &str, template: StepTemplate, max_consecutive_losses: u32) -> Self {
        Self {
            metadata: Some(StrategyMetadata {
                name: name.to_string(),
                max_consecutive_losses,
                aggressive: false,
            }),
            steps: vec![template],
        }
    }
}

/// Caller-supplied adjustments to the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerOverrides {
    #[serde(default)]
    pub max_stake: Option<Decimal>,
    /// Replace the payout percentage of individual contract types.
    #[serde(default)]
    pub payouts: HashMap<ContractType, Decimal>,
}

// ---------------------------------------------------------------------------
// Payouts
// ---------------------------------------------------------------------------

fn base_payout(contract_type: ContractType) -> Decimal {
    match contract_type {
        ContractType::RiseFall => dec!(95),
        ContractType::HigherLower => dec!(90),
        ContractType::TouchNoTouch => dec!(85),
        ContractType::EvenOdd => dec!(95),
        ContractType::OverUnder => dec!(90),
        ContractType::MatchesDiffers => dec!(10),
        ContractType::Multipliers => dec!(50),
    }
}

/// Expected net payout, in percent of stake, for a contract of `amount`.
pub fn payout_percentage(
    contract_type: ContractType,
    amount: Decimal,
    overrides: &PlannerOverrides,
) -> Decimal {
    let mut pct = overrides
        .payouts
        .get(&contract_type)
        .copied()
        .unwrap_or_else(|| base_payout(contract_type));
    if amount < Decimal::ONE {
        pct -= SMALL_STAKE_PENALTY;
    }
    pct.max(MIN_PAYOUT_PCT)
}

/// Stake scaling applied to non-aggressive plans: shrinks 5% per loss,
/// never below half.
pub fn dynamic_risk_factor(loss_index: usize) -> Decimal {
    (Decimal::ONE - dec!(0.05) * Decimal::from(loss_index)).max(dec!(0.5))
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub fn compute_steps(
    description: &StrategyDescription,
    base_stake: Decimal,
    overrides: &PlannerOverrides,
) -> Result<Vec<StrategyStep>, BotError> {
    let meta = description
        .metadata
        .as_ref()
        .ok_or_else(|| BotError::InvalidStrategy("strategy metadata missing".into()))?;
    if description.steps.is_empty() {
        return Err(BotError::InvalidStrategy(format!(
            "strategy '{}' has no steps",
            meta.name
        )));
    }
    if meta.max_consecutive_losses == 0 {
        return Err(BotError::InvalidStrategy(format!(
            "strategy '{}' must allow at least one consecutive loss",
            meta.name
        )));
    }
    if meta.max_consecutive_losses > MAX_CONSECUTIVE_LOSSES {
        return Err(BotError::InvalidStrategy(format!(
            "strategy '{}' allows {} consecutive losses, limit is {MAX_CONSECUTIVE_LOSSES}",
            meta.name, meta.max_consecutive_losses
        )));
    }
    if base_stake <= Decimal::ZERO {
        return Err(BotError::InvalidStrategy(format!(
            "base stake must be positive, got {base_stake}"
        )));
    }

    let max_losses = meta.max_consecutive_losses as usize;
    let max_stake = overrides.max_stake.unwrap_or(DEFAULT_MAX_STAKE);
    let template_for = |i: usize| &description.steps[i.min(description.steps.len() - 1)];

    let first = template_for(0);
    let first_payout = payout_percentage(first.contract_type, base_stake, overrides);
    let mut steps = Vec::with_capacity(max_losses + 1);
    steps.push(StrategyStep {
        index: 0,
        stake: round2(base_stake),
        multiplier: Decimal::ONE,
        contract_type: first.contract_type,
        trade_type: first.trade_type,
        duration: first.duration,
        duration_unit: first.duration_unit,
        anticipated_profit_pct: first_payout,
        formula: format!("base {base_stake:.2}"),
        is_emergency_recovery: false,
        stop_after_loss: false,
    });

    let mut cumulative_loss = base_stake;
    for i in 1..=max_losses {
        let template = template_for(i);
        let payout = payout_percentage(template.contract_type, cumulative_loss, overrides);
        let target_profit = percent_of(base_stake, first_payout);
        let raw = cumulative_loss + percent_of(cumulative_loss, payout) + target_profit;
        let mut amount = raw.min(max_stake);
        let mut formula = format!(
            "{cumulative_loss:.2} + {cumulative_loss:.2}x{payout}% + {base_stake:.2}x{first_payout}% = {raw:.2}"
        );
        if !meta.aggressive {
            let factor = dynamic_risk_factor(i);
            amount *= factor;
            formula.push_str(&format!(" x{factor}"));
        }
        let amount = round2(amount);
        let anticipated =
            round2((percent_of(amount, payout) - cumulative_loss) / cumulative_loss * dec!(100));
        let emergency = i == max_losses;

        steps.push(StrategyStep {
            index: i,
            stake: amount,
            multiplier: (amount / base_stake).round_dp(4),
            contract_type: template.contract_type,
            trade_type: template.trade_type,
            duration: template.duration,
            duration_unit: template.duration_unit,
            anticipated_profit_pct: anticipated,
            formula,
            is_emergency_recovery: emergency,
            stop_after_loss: emergency,
        });
        cumulative_loss += amount;
    }

    Ok(steps)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
