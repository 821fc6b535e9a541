//! Mock executor for integration testing.
//!
//! Provides a deterministic `TradeExecutor` that settles contracts from a
//! scripted list of outcomes, tracks an account balance and records every
//! receipt, all in-memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use stakeflow::amount::round2;
use stakeflow::engine::executor::{BalanceProvider, TradeExecutor};
use stakeflow::types::{TradeRequest, TradeResult};

/// A scripted brokerage for deterministic testing.
///
/// Outcomes are consumed in order; an empty script is an error so a test
/// never trades past what it planned.
pub struct MockExecutor {
    payout_pct: Decimal,
    outcomes: Arc<Mutex<VecDeque<bool>>>,
    balance: Arc<Mutex<Decimal>>,
    receipts: Arc<Mutex<Vec<TradeResult>>>,
    attempts: Arc<Mutex<u32>>,
    /// If set, every execution fails with this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockExecutor {
    pub fn new(initial_balance: Decimal, outcomes: &[bool]) -> Self {
        Self {
            payout_pct: dec!(95),
            outcomes: Arc::new(Mutex::new(outcomes.iter().copied().collect())),
            balance: Arc::new(Mutex::new(initial_balance)),
            receipts: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue more outcomes.
    pub fn push_outcomes(&self, outcomes: &[bool]) {
        self.outcomes.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Force all subsequent executions to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn get_receipts(&self) -> Vec<TradeResult> {
        self.receipts.lock().unwrap().clone()
    }

    pub fn stakes(&self) -> Vec<Decimal> {
        self.get_receipts().iter().map(|r| r.stake).collect()
    }

    /// Executions attempted, failed ones included.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl TradeExecutor for MockExecutor {
    async fn execute(&self, request: &TradeRequest) -> Result<TradeResult> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        let won = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted outcome left"))?;

        let profit = if won {
            round2(request.amount * self.payout_pct / dec!(100))
        } else {
            -request.amount
        };
        let balance_after = {
            let mut balance = self.balance.lock().unwrap();
            *balance += profit;
            *balance
        };

        let now = Utc::now();
        let receipt = TradeResult {
            contract_id: format!("MOCK-{}", self.receipts.lock().unwrap().len() + 1),
            symbol: request.symbol.clone(),
            contract_type: request.contract_type,
            trade_type: request.trade_type,
            stake: request.amount,
            payout: if won { request.amount + profit } else { Decimal::ZERO },
            profit,
            won,
            opened_at: now,
            closed_at: now,
            balance_after: Some(balance_after),
        };
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }
}

impl BalanceProvider for MockExecutor {
    fn balance(&self) -> Option<Decimal> {
        Some(*self.balance.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stakeflow::types::{Basis, ContractType, DurationUnit, TradeType};

    fn request(amount: Decimal) -> TradeRequest {
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

    #[tokio::test]
    async fn test_mock_settles_scripted_outcomes() {
        let mock = MockExecutor::new(dec!(100), &[true, false]);

        let win = mock.execute(&request(dec!(10))).await.unwrap();
        assert!(win.won);
        assert_eq!(win.profit, dec!(9.5));
        assert_eq!(win.balance_after, Some(dec!(109.5)));

        let loss = mock.execute(&request(dec!(20))).await.unwrap();
        assert!(!loss.won);
        assert_eq!(loss.profit, dec!(-20));
        assert_eq!(mock.balance(), Some(dec!(89.5)));
        assert_eq!(mock.get_receipts().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_empty_script_errors() {
        let mock = MockExecutor::new(dec!(100), &[]);
        tokio_test::assert_err!(mock.execute(&request(dec!(1))).await);
        assert_eq!(mock.attempts(), 1);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let mock = MockExecutor::new(dec!(100), &[true]);
        mock.set_error("platform maintenance");
        let err = mock.execute(&request(dec!(1))).await.unwrap_err();
        assert!(err.to_string().contains("maintenance"));
        assert!(mock.get_receipts().is_empty());

        mock.clear_error();
        assert!(mock.execute(&request(dec!(1))).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_push_outcomes() {
        let mock = MockExecutor::new(dec!(100), &[]);
        mock.push_outcomes(&[false]);
        let loss = mock.execute(&request(dec!(5))).await.unwrap();
        assert!(!loss.won);
        assert_eq!(mock.stakes(), vec![dec!(5)]);
    }
}
