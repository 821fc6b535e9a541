//! End-to-end bot runs: start, trade, halt, persisted and restarted.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stakeflow::config::{AlternationSettings, BotConfiguration, MarketSettings};
use stakeflow::engine::bot::{BotController, StartOutcome};
use stakeflow::engine::clock::TokioClock;
use stakeflow::engine::notifier::{BotEvent, EventKind};
use stakeflow::risk::StopReason;
use stakeflow::storage;
use stakeflow::strategy::sequence::SequenceSettings;
use stakeflow::strategy::StrategySettings;
use stakeflow::types::{Basis, BotStatus, ContractType, DurationUnit, TradeType};

use crate::mock_executor::MockExecutor;

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 11, 10, 0, 0).unwrap()
}

fn make_config(symbol: &str) -> BotConfiguration {
    let market = MarketSettings {
        symbol: symbol.into(),
        contract_type: ContractType::RiseFall,
        trade_type: TradeType::Rise,
        duration: 5,
        duration_unit: DurationUnit::Ticks,
        prediction: None,
        multiplier: None,
        allow_equals: false,
        basis: Basis::Stake,
        currency: "USD".into(),
        alternation: AlternationSettings::default(),
    };
    let mut cfg = BotConfiguration::new(&format!("{symbol}-bot"), market, dec!(10));
    cfg.trade_interval_ms = 1_000;
    cfg
}

fn make_bot(cfg: BotConfiguration, exec: &Arc<MockExecutor>) -> BotController {
    BotController::new(cfg)
        .with_executor(exec.clone())
        .with_balance_provider(exec.clone())
        .with_clock(Arc::new(TokioClock::starting_at(anchor())))
}

fn record_events(bot: &BotController) -> Arc<Mutex<Vec<BotEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bot.subscribe(move |e| {
        sink.lock().unwrap().push(e.clone());
        Ok(())
    });
    events
}

fn count(events: &Mutex<Vec<BotEvent>>, kind: EventKind) -> usize {
    events.lock().unwrap().iter().filter(|e| e.kind == kind).count()
}

fn temp_path(kind: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("stakeflow_it_{kind}_{}.json", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_sequence_run_completes_and_persists_statistics() {
    let exec = Arc::new(MockExecutor::new(dec!(500), &[true, true, true, true, true]));
    let mut cfg = make_config("R_100");
    cfg.strategy = StrategySettings::Sequence1326(SequenceSettings {
        stop_on_completion: true,
        ..SequenceSettings::default()
    });
    let bot = make_bot(cfg, &exec);
    let events = record_events(&bot);

    assert_eq!(bot.start(), Ok(StartOutcome::Started));
    advance(5_000).await;

    assert_eq!(exec.stakes(), vec![dec!(10), dec!(30), dec!(20), dec!(60)]);
    assert_eq!(bot.status(), BotStatus::Stopped);
    assert!(matches!(bot.last_stop_reason(), Some(StopReason::Strategy { .. })));
    assert_eq!(bot.pending_timers(), 0);

    let session = bot.session();
    assert_eq!(session.starting_balance, dec!(500));
    assert_eq!(session.current_balance, dec!(614));
    assert_eq!(session.total_profit, dec!(114));
    assert_eq!(count(&events, EventKind::TradeWon), 4);
    assert!(count(&events, EventKind::StrategyReset) >= 1);

    let path = temp_path("stats");
    storage::save_statistics(&bot.statistics(), Some(&path)).unwrap();
    let loaded = storage::load_statistics(Some(&path)).unwrap().unwrap();
    assert_eq!(loaded, bot.statistics());
    assert_eq!(loaded.runs, 1);
    assert_eq!(loaded.tally.trades, 4);
    storage::delete_file(&path).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_executor_outage_is_retried() {
    let exec = Arc::new(MockExecutor::new(dec!(1000), &[true, true]));
    exec.set_error("platform maintenance");
    let bot = make_bot(make_config("R_50"), &exec);
    let events = record_events(&bot);
    bot.start().unwrap();

    advance(12_000).await;
    assert_eq!(exec.attempts(), 3);
    assert_eq!(count(&events, EventKind::Error), 3);
    assert_eq!(bot.session().total_trades, 0);
    assert_eq!(bot.status(), BotStatus::Started);

    exec.clear_error();
    advance(3_500).await;
    assert_eq!(bot.session().total_trades, 1);
    bot.stop();
}

#[tokio::test(start_paused = true)]
async fn test_two_bots_share_one_executor() {
    let exec = Arc::new(MockExecutor::new(dec!(10_000), &[true; 6]));
    let first = make_bot(make_config("R_10"), &exec);
    let second = make_bot(make_config("R_25"), &exec);
    first.start().unwrap();
    second.start().unwrap();

    advance(2_500).await;
    assert_eq!(first.session().total_trades, 3);
    assert_eq!(second.session().total_trades, 3);
    assert!(first.trade_history().iter().all(|t| t.symbol == "R_10"));
    assert!(second.trade_history().iter().all(|t| t.symbol == "R_25"));
    assert_eq!(exec.get_receipts().len(), 6);
    assert_ne!(first.id(), second.id());

    first.stop();
    second.stop();
}

#[tokio::test(start_paused = true)]
async fn test_restart_begins_fresh_session_keeps_lifetime() {
    let exec = Arc::new(MockExecutor::new(dec!(1000), &[false, true]));
    let bot = make_bot(make_config("R_100"), &exec);
    bot.start().unwrap();
    advance(1_500).await;
    bot.stop();
    assert_eq!(bot.session().total_trades, 2);
    assert_eq!(bot.last_stop_reason(), Some(StopReason::Manual));

    exec.push_outcomes(&[true]);
    bot.start().unwrap();
    assert_eq!(bot.session().total_trades, 0);
    assert_eq!(bot.session().starting_balance, dec!(1009));
    advance(500).await;

    assert_eq!(bot.session().total_trades, 1);
    assert_eq!(exec.stakes(), vec![dec!(10), dec!(20), dec!(10)]);
    let stats = bot.statistics();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.tally.trades, 3);
    bot.stop();
}

#[tokio::test(start_paused = true)]
async fn test_rapid_losses_pause_trading() {
    let exec = Arc::new(MockExecutor::new(dec!(1000), &[false, false, true]));
    let mut cfg = make_config("R_100");
    cfg.rapid_loss.enabled = true;
    cfg.rapid_loss.threshold = 2;
    cfg.rapid_loss.window_ms = 60_000;
    cfg.rapid_loss.initial_cooldown_ms = 30_000;
    let bot = make_bot(cfg, &exec);
    let events = record_events(&bot);
    bot.start().unwrap();

    advance(20_000).await;
    assert_eq!(exec.get_receipts().len(), 2);
    assert_eq!(count(&events, EventKind::CooldownStarted), 1);
    let started = events
        .lock()
        .unwrap()
        .iter()
        .find(|e| e.kind == EventKind::CooldownStarted)
        .and_then(|e| e.data.clone())
        .unwrap();
    assert_eq!(started["cause"], "rapid_loss");

    advance(12_000).await;
    assert_eq!(exec.stakes(), vec![dec!(10), dec!(20), dec!(40)]);
    assert_eq!(count(&events, EventKind::CooldownEnded), 1);
    bot.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_loss_with_executor_balance() {
    let exec = Arc::new(MockExecutor::new(dec!(1000), &[false, false, false]));
    let mut cfg = make_config("R_100");
    cfg.amounts.stop_loss = Some(dec!(30));
    let bot = make_bot(cfg, &exec);
    let events = record_events(&bot);
    bot.start().unwrap();
    advance(5_000).await;

    assert_eq!(bot.status(), BotStatus::Stopped);
    assert_eq!(exec.get_receipts().len(), 2);
    assert_eq!(bot.session().current_balance, dec!(970));
    assert_eq!(count(&events, EventKind::StopLossTriggered), 1);
    assert!(bot.risk_state().circuit_breaker);
}

#[test]
fn test_configuration_survives_restart() {
    let exec = Arc::new(MockExecutor::new(dec!(1000), &[]));
    let mut cfg = make_config("R_75");
    cfg.risk.max_consecutive_losses = 4;
    cfg.amounts.take_profit = Some(dec!(40));
    let bot = make_bot(cfg, &exec);

    let path = temp_path("config");
    storage::save_configuration(&bot.configuration(), Some(&path)).unwrap();
    let loaded = storage::load_configuration(Some(&path)).unwrap().unwrap();
    storage::delete_file(&path).unwrap();

    let restored = make_bot(loaded, &exec);
    assert_eq!(restored.id(), bot.id());
    assert_eq!(restored.configuration(), bot.configuration());
    assert_eq!(restored.risk_steps(), bot.risk_steps());
    assert_eq!(restored.risk_steps().len(), 5);
    assert!(restored.risk_steps().iter().all(|s| s.stake > Decimal::ZERO));
}
