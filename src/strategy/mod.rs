//! Strategy engine: stake progressions, recovery planning and recovery
//! control.
//!
//! Each strategy family is a pure function: it receives the current
//! progression counters plus the last settled trade (or `None` at session
//! start) and returns new counters with the next strategy stake. The
//! lifecycle controller owns the counters and swaps them in wholesale.

pub mod dalembert;
pub mod martingale;
pub mod oscars_grind;
pub mod planner;
pub mod recovery;
pub mod sequence;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::amount::percent_of;
use crate::types::{BotError, SessionState, StrategyCounters, TradeResult};
use dalembert::{DalembertResetSettings, DalembertSettings, ReverseDalembertResetSettings};
use martingale::{
    MartingaleResetSettings, MartingaleSettings, ReverseMartingaleResetSettings,
    ReverseMartingaleSettings,
};
use oscars_grind::OscarsGrindSettings;
use sequence::SequenceSettings;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Stake-progression strategy with its own settings payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySettings {
    Martingale(MartingaleSettings),
    MartingaleReset(MartingaleResetSettings),
    Dalembert(DalembertSettings),
    DalembertReset(DalembertResetSettings),
    ReverseMartingale(ReverseMartingaleSettings),
    ReverseMartingaleReset(ReverseMartingaleResetSettings),
    ReverseDalembert(DalembertSettings),
    ReverseDalembertReset(ReverseDalembertResetSettings),
    OscarsGrind(OscarsGrindSettings),
    #[serde(rename = "one_three_two_six")]
    Sequence1326(SequenceSettings),
}

impl StrategySettings {
    /// Short identifier used in logs and notifications.
    pub fn id(&self) -> &'static str {
        match self {
            StrategySettings::Martingale(_) => "martingale",
            StrategySettings::MartingaleReset(_) => "martingale_reset",
            StrategySettings::Dalembert(_) => "dalembert",
            StrategySettings::DalembertReset(_) => "dalembert_reset",
            StrategySettings::ReverseMartingale(_) => "reverse_martingale",
            StrategySettings::ReverseMartingaleReset(_) => "reverse_martingale_reset",
            StrategySettings::ReverseDalembert(_) => "reverse_dalembert",
            StrategySettings::ReverseDalembertReset(_) => "reverse_dalembert_reset",
            StrategySettings::OscarsGrind(_) => "oscars_grind",
            StrategySettings::Sequence1326(_) => "one_three_two_six",
        }
    }

    /// Reject payloads no progression can run with.
    pub fn validate(&self) -> Result<(), BotError> {
        match self {
            StrategySettings::Martingale(s) => s.validate(),
            StrategySettings::MartingaleReset(s) => s.validate(),
            StrategySettings::Dalembert(s) | StrategySettings::ReverseDalembert(s) => s.validate(),
            StrategySettings::DalembertReset(s) => s.validate(),
            StrategySettings::ReverseMartingale(s) => s.validate(),
            StrategySettings::ReverseMartingaleReset(s) => s.validate(),
            StrategySettings::ReverseDalembertReset(s) => s.validate(),
            StrategySettings::OscarsGrind(s) => s.validate(),
            StrategySettings::Sequence1326(s) => s.validate(),
        }
    }
}

impl Default for StrategySettings {
    fn default() -> Self {
        StrategySettings::Martingale(MartingaleSettings::default())
    }
}

/// Balance-proportional sizing, independent of the progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundingSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Stake as a percentage of the current balance.
    #[serde(default = "default_compounding_pct")]
    pub balance_pct: Decimal,
}

fn default_compounding_pct() -> Decimal {
    dec!(1)
}

impl Default for CompoundingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            balance_pct: default_compounding_pct(),
        }
    }
}

impl CompoundingSettings {
    /// Compounded stake, or `None` when compounding is off.
    pub fn stake(&self, balance: Decimal) -> Option<Decimal> {
        self.enabled.then(|| percent_of(balance, self.balance_pct))
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Session facts a strategy may read. Built after the last result has
/// been applied to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeContext {
    pub base_stake: Decimal,
    pub balance: Decimal,
    pub session_profit: Decimal,
    pub total_trades: u32,
    pub wins: u32,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
}

impl StakeContext {
    pub fn from_session(session: &SessionState) -> Self {
        Self {
            base_stake: session.base_stake,
            balance: session.current_balance,
            session_profit: session.total_profit,
            total_trades: session.total_trades,
            wins: session.wins,
            consecutive_wins: session.consecutive_wins,
            consecutive_losses: session.consecutive_losses,
        }
    }

    /// Win rate in percent, or `None` below the given sample size.
    pub fn win_rate_over(&self, min_sample: u32) -> Option<Decimal> {
        (self.total_trades > min_sample)
            .then(|| Decimal::from(self.wins) / Decimal::from(self.total_trades) * dec!(100))
    }
}

/// The parts of a settled trade a progression reacts to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub won: bool,
    pub stake: Decimal,
    pub profit: Decimal,
}

impl TradeOutcome {
    pub fn win(stake: Decimal, profit: Decimal) -> Self {
        Self { won: true, stake, profit }
    }

    pub fn loss(stake: Decimal) -> Self {
        Self {
            won: false,
            stake,
            profit: -stake,
        }
    }

    /// Net profit per unit staked, when it can be observed.
    pub fn payout_ratio(&self) -> Option<Decimal> {
        (self.won && self.stake > Decimal::ZERO && self.profit > Decimal::ZERO)
            .then(|| self.profit / self.stake)
    }
}

impl From<&TradeResult> for TradeOutcome {
    fn from(r: &TradeResult) -> Self {
        Self {
            won: r.won,
            stake: r.stake,
            profit: r.profit,
        }
    }
}

/// Something a progression wants surfaced as a `strategy_reset` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyNotice {
    pub reason: String,
}

/// Result of one strategy computation.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeOutcome {
    pub counters: StrategyCounters,
    /// Unclamped stake proposed for the next trade.
    pub stake: Decimal,
    pub notices: Vec<StrategyNotice>,
    /// Set when the progression asks the bot to stop.
    pub halt: Option<String>,
}

impl StakeOutcome {
    pub(crate) fn new(counters: StrategyCounters, stake: Decimal) -> Self {
        Self {
            counters,
            stake,
            notices: Vec::new(),
            halt: None,
        }
    }

    pub(crate) fn notice(&mut self, reason: impl Into<String>) {
        self.notices.push(StrategyNotice {
            reason: reason.into(),
        });
    }
}

impl StrategyCounters {
    /// Common bookkeeping applied before any family-specific rule.
    pub(crate) fn advanced(&self, outcome: Option<&TradeOutcome>) -> Self {
        let mut next = self.clone();
        if let Some(o) = outcome {
            next.trades_since_reset += 1;
            next.progression_profit += o.profit;
            if o.won {
                next.wins_since_reset += 1;
            } else {
                next.wins_since_reset = 0;
            }
        }
        next
    }

    /// The progression restarted from its base case.
    pub(crate) fn restart_progression(&mut self) {
        self.progression_profit = Decimal::ZERO;
        self.wins_since_reset = 0;
    }

    /// A periodic forced reset: progression and trade window both restart.
    pub(crate) fn force_reset(&mut self) {
        self.restart_progression();
        self.trades_since_reset = 0;
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Fresh counters and opening stake for a new session.
pub fn initial(settings: &StrategySettings, ctx: &StakeContext) -> StakeOutcome {
    compute(settings, &StrategyCounters::default(), None, ctx)
}

/// Progress the strategy after a settled trade.
pub fn on_result(
    settings: &StrategySettings,
    counters: &StrategyCounters,
    outcome: &TradeOutcome,
    ctx: &StakeContext,
) -> StakeOutcome {
    compute(settings, counters, Some(outcome), ctx)
}

fn compute(
    settings: &StrategySettings,
    counters: &StrategyCounters,
    outcome: Option<&TradeOutcome>,
    ctx: &StakeContext,
) -> StakeOutcome {
    match settings {
        StrategySettings::Martingale(s) => martingale::martingale(s, counters, outcome, ctx),
        StrategySettings::MartingaleReset(s) => {
            martingale::martingale_reset(s, counters, outcome, ctx)
        }
        StrategySettings::Dalembert(s) => dalembert::dalembert(s, counters, outcome, ctx),
        StrategySettings::DalembertReset(s) => {
            dalembert::dalembert_reset(s, counters, outcome, ctx)
        }
        StrategySettings::ReverseMartingale(s) => {
            martingale::reverse_martingale(s, counters, outcome, ctx)
        }
        StrategySettings::ReverseMartingaleReset(s) => {
            martingale::reverse_martingale_reset(s, counters, outcome, ctx)
        }
        StrategySettings::ReverseDalembert(s) => {
            dalembert::reverse_dalembert(s, counters, outcome, ctx)
        }
        StrategySettings::ReverseDalembertReset(s) => {
            dalembert::reverse_dalembert_reset(s, counters, outcome, ctx)
        }
        StrategySettings::OscarsGrind(s) => oscars_grind::oscars_grind(s, counters, outcome, ctx),
        StrategySettings::Sequence1326(s) => sequence::sequence(s, counters, outcome, ctx),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ctx(base: Decimal) -> StakeContext {
        StakeContext {
            base_stake: base,
            balance: dec!(1000),
            session_profit: Decimal::ZERO,
            total_trades: 0,
            wins: 0,
            consecutive_wins: 0,
            consecutive_losses: 0,
        }
    }

    /// Run a sequence of outcomes through `settings`, returning the stake
    /// proposed before each trade plus the one after the last.
    pub(crate) fn run(
        settings: &StrategySettings,
        base: Decimal,
        outcomes: &[TradeOutcome],
    ) -> (Vec<Decimal>, StakeOutcome) {
        let mut c = ctx(base);
        let mut out = initial(settings, &c);
        let mut stakes = vec![out.stake];
        for o in outcomes {
            c.total_trades += 1;
            c.session_profit += o.profit;
            if o.won {
                c.wins += 1;
                c.consecutive_wins += 1;
                c.consecutive_losses = 0;
            } else {
                c.consecutive_losses += 1;
                c.consecutive_wins = 0;
            }
            out = on_result(settings, &out.counters, o, &c);
            stakes.push(out.stake);
        }
        (stakes, out)
    }

    #[test]
    fn test_serde_tag_roundtrip() {
        let s = StrategySettings::Sequence1326(SequenceSettings::default());
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "one_three_two_six");
        let back: StrategySettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);

        let json = serde_json::json!({ "kind": "dalembert", "increment": 2 });
        let parsed: StrategySettings = serde_json::from_value(json).unwrap();
        match parsed {
            StrategySettings::Dalembert(d) => {
                assert_eq!(d.increment, 2);
                assert_eq!(d.decrement, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ids_are_distinct() {
        let all = vec![
            StrategySettings::Martingale(Default::default()),
            StrategySettings::MartingaleReset(Default::default()),
            StrategySettings::Dalembert(Default::default()),
            StrategySettings::DalembertReset(Default::default()),
            StrategySettings::ReverseMartingale(Default::default()),
            StrategySettings::ReverseMartingaleReset(Default::default()),
            StrategySettings::ReverseDalembert(Default::default()),
            StrategySettings::ReverseDalembertReset(Default::default()),
            StrategySettings::OscarsGrind(Default::default()),
            StrategySettings::Sequence1326(Default::default()),
        ];
        let mut ids: Vec<_> = all.iter().map(|s| s.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), all.len());
        for s in &all {
            assert!(s.validate().is_ok(), "{} defaults must validate", s.id());
        }
    }

    #[test]
    fn test_two_wins_return_to_base_for_negative_progressions() {
        let base = dec!(10);
        let wins = [
            TradeOutcome::win(dec!(10), dec!(9.5)),
            TradeOutcome::win(dec!(10), dec!(9.5)),
        ];
        for settings in [
            StrategySettings::Martingale(Default::default()),
            StrategySettings::MartingaleReset(Default::default()),
            StrategySettings::Dalembert(Default::default()),
            StrategySettings::DalembertReset(Default::default()),
            StrategySettings::OscarsGrind(Default::default()),
        ] {
            let (stakes, _) = run(&settings, base, &wins);
            assert_eq!(stakes[2], base, "{} after two wins", settings.id());
        }
    }

    #[test]
    fn test_positive_progressions_return_to_base() {
        use dalembert::ReverseDalembertResetSettings;
        use martingale::ReverseMartingaleResetSettings;

        let base = dec!(10);
        let win = TradeOutcome::win(dec!(10), dec!(9.5));
        let loss = TradeOutcome::loss(dec!(10));

        // Reset variants bank a two-win streak.
        for settings in [
            StrategySettings::ReverseMartingaleReset(ReverseMartingaleResetSettings {
                reset_after_wins: 2,
                ..Default::default()
            }),
            StrategySettings::ReverseDalembertReset(ReverseDalembertResetSettings {
                reset_every_trades: 2,
                ..Default::default()
            }),
        ] {
            let (stakes, out) = run(&settings, base, &[win, win]);
            assert!(stakes[1] > base, "{} presses the first win", settings.id());
            assert_eq!(stakes[2], base, "{} after two wins", settings.id());
            assert_eq!(out.notices.len(), 1);
        }

        // Plain reverse progressions and the fixed sequence restart on a loss.
        for settings in [
            StrategySettings::ReverseMartingale(Default::default()),
            StrategySettings::ReverseDalembert(Default::default()),
            StrategySettings::Sequence1326(Default::default()),
        ] {
            let (stakes, _) = run(&settings, base, &[win, loss]);
            assert!(stakes[1] > base, "{} advances on a win", settings.id());
            assert_eq!(stakes[2], base, "{} after win then loss", settings.id());
        }
    }

    #[test]
    fn test_compounding_stake() {
        let off = CompoundingSettings::default();
        assert_eq!(off.stake(dec!(1000)), None);
        let on = CompoundingSettings {
            enabled: true,
            balance_pct: dec!(2.5),
        };
        assert_eq!(on.stake(dec!(1000)), Some(dec!(25)));
    }

    #[test]
    fn test_outcome_payout_ratio() {
        assert_eq!(TradeOutcome::win(dec!(10), dec!(9.5)).payout_ratio(), Some(dec!(0.95)));
        assert_eq!(TradeOutcome::loss(dec!(10)).payout_ratio(), None);
    }

    #[test]
    fn test_counter_bookkeeping() {
        let c = StrategyCounters::default();
        let next = c.advanced(Some(&TradeOutcome::win(dec!(5), dec!(4))));
        assert_eq!(next.trades_since_reset, 1);
        assert_eq!(next.wins_since_reset, 1);
        assert_eq!(next.progression_profit, dec!(4));
        let next = next.advanced(Some(&TradeOutcome::loss(dec!(5))));
        assert_eq!(next.wins_since_reset, 0);
        assert_eq!(next.progression_profit, dec!(-1));
        assert_eq!(c.advanced(None), c);
    }
}
