//! Accountant: realtime performance and lifetime statistics.
//!
//! Every settled trade is booked twice: into the tally of the current run
//! (reset on each start) and into the lifetime aggregate, which survives
//! restarts through `storage`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TradeResult;

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Running counters over a series of trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeTally {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_staked: Decimal,
    pub gross_profit: Decimal,
    /// Sum of losing trades, as a positive number.
    pub gross_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub current_win_streak: u32,
    pub current_loss_streak: u32,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
}

impl TradeTally {
    pub fn record(&mut self, result: &TradeResult) {
        self.trades += 1;
        self.total_staked += result.stake;
        if result.won {
            self.wins += 1;
            self.gross_profit += result.profit;
            self.largest_win = self.largest_win.max(result.profit);
            self.current_win_streak += 1;
            self.current_loss_streak = 0;
            self.max_win_streak = self.max_win_streak.max(self.current_win_streak);
        } else {
            let loss = -result.profit;
            self.losses += 1;
            self.gross_loss += loss;
            self.largest_loss = self.largest_loss.max(loss);
            self.current_loss_streak += 1;
            self.current_win_streak = 0;
            self.max_loss_streak = self.max_loss_streak.max(self.current_loss_streak);
        }
    }

    pub fn net_profit(&self) -> Decimal {
        self.gross_profit - self.gross_loss
    }

    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(self.trades) * dec!(100)
        }
    }

    pub fn avg_win(&self) -> Decimal {
        if self.wins == 0 {
            Decimal::ZERO
        } else {
            self.gross_profit / Decimal::from(self.wins)
        }
    }

    pub fn avg_loss(&self) -> Decimal {
        if self.losses == 0 {
            Decimal::ZERO
        } else {
            self.gross_loss / Decimal::from(self.losses)
        }
    }

    /// `(avg win × wins) / (avg loss × losses)`. `None` without losses.
    pub fn profit_factor(&self) -> Option<Decimal> {
        let denominator = self.avg_loss() * Decimal::from(self.losses);
        if denominator.is_zero() {
            None
        } else {
            Some((self.avg_win() * Decimal::from(self.wins) / denominator).round_dp(4))
        }
    }

    /// Net profit over total staked, in percent.
    pub fn roi_pct(&self) -> Decimal {
        if self.total_staked.is_zero() {
            Decimal::ZERO
        } else {
            self.net_profit() / self.total_staked * dec!(100)
        }
    }
}

/// Serializable view of a tally with derived figures filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: Decimal,
    pub net_profit: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: Option<Decimal>,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub total_staked: Decimal,
    pub roi_pct: Decimal,
}

impl From<&TradeTally> for PerformanceReport {
    fn from(t: &TradeTally) -> Self {
        Self {
            trades: t.trades,
            wins: t.wins,
            losses: t.losses,
            win_rate: t.win_rate().round_dp(2),
            net_profit: t.net_profit(),
            gross_profit: t.gross_profit,
            gross_loss: t.gross_loss,
            avg_win: t.avg_win().round_dp(2),
            avg_loss: t.avg_loss().round_dp(2),
            profit_factor: t.profit_factor(),
            largest_win: t.largest_win,
            largest_loss: t.largest_loss,
            max_consecutive_wins: t.max_win_streak,
            max_consecutive_losses: t.max_loss_streak,
            total_staked: t.total_staked,
            roi_pct: t.roi_pct().round_dp(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifetime statistics
// ---------------------------------------------------------------------------

/// Counters that outlive a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsAggregate {
    pub tally: TradeTally,
    pub runs: u32,
    pub total_runtime_secs: i64,
    pub first_started_at: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
}

impl StatisticsAggregate {
    pub fn report(&self) -> PerformanceReport {
        PerformanceReport::from(&self.tally)
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Accountant {
    session: TradeTally,
    lifetime: StatisticsAggregate,
    run_started_at: Option<DateTime<Utc>>,
}

impl Accountant {
    pub fn with_lifetime(lifetime: StatisticsAggregate) -> Self {
        Self {
            lifetime,
            ..Default::default()
        }
    }

    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.session = TradeTally::default();
        self.run_started_at = Some(now);
        self.lifetime.runs += 1;
        self.lifetime.first_started_at.get_or_insert(now);
        self.lifetime.last_started_at = Some(now);
    }

    /// Book a settled trade into both the run and the lifetime tallies.
    pub fn record(&mut self, result: &TradeResult) {
        self.session.record(result);
        self.lifetime.tally.record(result);
        info!(
            contract = %result.contract_id,
            won = result.won,
            profit = format!("{:+.2}", result.profit),
            session_net = format!("{:+.2}", self.session.net_profit()),
            lifetime_trades = self.lifetime.tally.trades,
            "Trade booked"
        );
    }

    /// Close the current run. No-op when no run is open.
    pub fn finalize_run(&mut self, now: DateTime<Utc>) {
        if let Some(started) = self.run_started_at.take() {
            let secs = (now - started).num_seconds().max(0);
            self.lifetime.total_runtime_secs += secs;
            self.lifetime.last_stopped_at = Some(now);
            info!(
                runtime_secs = secs,
                trades = self.session.trades,
                net = format!("{:+.2}", self.session.net_profit()),
                "Run finalized"
            );
        }
    }

    pub fn performance(&self) -> PerformanceReport {
        PerformanceReport::from(&self.session)
    }

    pub fn statistics(&self) -> &StatisticsAggregate {
        &self.lifetime
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
