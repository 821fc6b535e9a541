//! Trade executor.
//!
//! The engine never talks to a brokerage itself: it hands a
//! `TradeRequest` to a `TradeExecutor` and waits for the settled
//! `TradeResult`. `PaperExecutor` settles contracts locally with a coin
//! flip, for dry runs and demos.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::amount::{percent_of, round2};
use crate::types::{TradeRequest, TradeResult};

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Buys one contract and waits for it to settle. Any error is treated as
/// retryable by the caller. Shared between bots, so it must tolerate
/// concurrent calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, request: &TradeRequest) -> Result<TradeResult>;
}

/// Reports the account balance, when known.
#[cfg_attr(test, mockall::automock)]
pub trait BalanceProvider: Send + Sync {
    fn balance(&self) -> Option<Decimal>;
}

// ---------------------------------------------------------------------------
// Paper executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSettings {
    /// Probability that a contract wins, in [0, 1].
    #[serde(default = "default_win_probability")]
    pub win_probability: f64,
    /// Net payout on a win, in percent of stake.
    #[serde(default = "default_payout_pct")]
    pub payout_pct: Decimal,
    /// Simulated time until settlement.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_win_probability() -> f64 {
    0.5
}

fn default_payout_pct() -> Decimal {
    dec!(95)
}

fn default_starting_balance() -> Decimal {
    dec!(1000)
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            win_probability: default_win_probability(),
            payout_pct: default_payout_pct(),
            latency_ms: 0,
            starting_balance: default_starting_balance(),
            seed: None,
        }
    }
}

/// Local simulated brokerage.
pub struct PaperExecutor {
    settings: PaperSettings,
    balance: Mutex<Decimal>,
    rng: Mutex<StdRng>,
}

impl PaperExecutor {
    pub fn new(settings: PaperSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            win_probability = settings.win_probability,
            payout = %settings.payout_pct,
            balance = %settings.starting_balance,
            "Paper executor ready"
        );
        Self {
            balance: Mutex::new(settings.starting_balance),
            rng: Mutex::new(rng),
            settings,
        }
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn execute(&self, request: &TradeRequest) -> Result<TradeResult> {
        if request.amount <= Decimal::ZERO {
            bail!("stake must be positive, got {}", request.amount);
        }
        {
            let balance = self.balance.lock();
            if request.amount > *balance {
                bail!(
                    "insufficient paper balance: stake {} > {}",
                    request.amount,
                    *balance
                );
            }
        }

        let opened_at = Utc::now();
        if self.settings.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.latency_ms)).await;
        }

        let won = self
            .rng
            .lock()
            .gen_bool(self.settings.win_probability.clamp(0.0, 1.0));
        let profit = if won {
            round2(percent_of(request.amount, self.settings.payout_pct))
        } else {
            -request.amount
        };
        let balance_after = {
            let mut balance = self.balance.lock();
            *balance += profit;
            *balance
        };

        debug!(request = %request, won, profit = %profit, "Paper contract settled");

        Ok(TradeResult {
            contract_id: format!("paper-{}", Uuid::new_v4().simple()),
            symbol: request.symbol.clone(),
            contract_type: request.contract_type,
            trade_type: request.trade_type,
            stake: request.amount,
            payout: if won { request.amount + profit } else { Decimal::ZERO },
            profit,
            won,
            opened_at,
            closed_at: Utc::now(),
            balance_after: Some(balance_after),
        })
    }
}

impl BalanceProvider for PaperExecutor {
    fn balance(&self) -> Option<Decimal> {
        Some(*self.balance.lock())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Basis, ContractType, DurationUnit, TradeType};

    fn make_request(amount: Decimal) -> TradeRequest {
        TradeRequest {
            symbol: "R_100".into(),
            contract_type: ContractType::RiseFall,
            trade_type: TradeType::Rise,
            amount,
            duration: 5,
            duration_unit: DurationUnit::Ticks,
            prediction: None,
            multiplier: None,
            allow_equals: false,
            basis: Basis::Stake,
            currency: "USD".into(),
        }
    }

    fn make_paper(win_probability: f64) -> PaperExecutor {
        PaperExecutor::new(PaperSettings {
            win_probability,
            seed: Some(7),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_paper_win_pays_out() {
        let paper = make_paper(1.0);
        let result = paper.execute(&make_request(dec!(10))).await.unwrap();
        assert!(result.won);
        assert_eq!(result.profit, dec!(9.5));
        assert_eq!(result.payout, dec!(19.5));
        assert_eq!(result.balance_after, Some(dec!(1009.5)));
        assert_eq!(paper.balance(), Some(dec!(1009.5)));
    }

    #[tokio::test]
    async fn test_paper_loss_costs_stake() {
        let paper = make_paper(0.0);
        let result = paper.execute(&make_request(dec!(10))).await.unwrap();
        assert!(!result.won);
        assert_eq!(result.profit, dec!(-10));
        assert_eq!(paper.balance(), Some(dec!(990)));
    }

    #[tokio::test]
    async fn test_paper_rejects_bad_stakes() {
        let paper = make_paper(0.5);
        assert!(paper.execute(&make_request(Decimal::ZERO)).await.is_err());
        assert!(paper.execute(&make_request(dec!(5000))).await.is_err());
        assert_eq!(paper.balance(), Some(dec!(1000)));
    }

    #[tokio::test]
    async fn test_paper_concurrent_calls_keep_balance_consistent() {
        let paper = make_paper(0.0);
        let requests: Vec<_> = (0..10).map(|_| make_request(dec!(5))).collect();
        let results = futures::future::join_all(requests.iter().map(|r| paper.execute(r))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(paper.balance(), Some(dec!(950)));
    }

    #[test]
    fn test_paper_execute_on_blocking_runtime() {
        let paper = make_paper(1.0);
        let result = tokio_test::block_on(paper.execute(&make_request(dec!(2))));
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let mut mock = MockTradeExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("socket closed")));
        let err = mock.execute(&make_request(dec!(1))).await.unwrap_err();
        assert!(err.to_string().contains("socket closed"));
    }
}
