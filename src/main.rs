//! STAKEFLOW: Stake-Progression Trading Bot Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores lifetime statistics, runs one bot on the paper executor and
//! shuts down cleanly on Ctrl+C or when the bot halts.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use stakeflow::config;
use stakeflow::dashboard;
use stakeflow::engine::bot::{BotController, StartOutcome};
use stakeflow::engine::executor::PaperExecutor;
use stakeflow::engine::notifier::{BotEvent, EventKind};
use stakeflow::storage;
use stakeflow::types::BotStatus;

const BANNER: &str = r#"
 ____ _____  _    _  _______ _____ _     _____        __
/ ___|_   _|/ \  | |/ / ____|  ___| |   / _ \ \      / /
\___ \ | | / _ \ | ' /|  _| | |_  | |  | | | \ \ /\ / /
 ___) || |/ ___ \| . \| |___|  _| | |__| |_| |\ V  V /
|____/ |_/_/   \_\_|\_\_____|_|   |_____\___/  \_/\_/

  Stake-Progression Trading Bot Engine
  v0.1.0 · Paper Trading
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("STAKEFLOW_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        runner = %cfg.runner.name,
        bot = %cfg.bot.name,
        symbol = %cfg.bot.market.symbol,
        strategy = cfg.bot.strategy.id(),
        base_stake = %cfg.bot.amounts.base_stake,
        "STAKEFLOW starting up"
    );

    // -- Restore statistics ----------------------------------------------

    let statistics = storage::load_statistics(Some(&cfg.runner.statistics_path))?.unwrap_or_default();

    // -- Build the bot ---------------------------------------------------

    let paper = Arc::new(PaperExecutor::new(cfg.paper.clone()));
    let bot = BotController::new(cfg.bot.clone())
        .with_executor(paper.clone())
        .with_balance_provider(paper)
        .with_statistics(statistics);

    bot.subscribe(|event| {
        log_event(event);
        Ok(())
    });
    let mut events = bot.subscribe_channel();

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(bot.clone(), cfg.dashboard.port);
    }

    match bot.start() {
        Ok(StartOutcome::Started) => info!("Bot running. Press Ctrl+C to stop."),
        Ok(StartOutcome::AwaitingSchedule) => {
            info!("Outside trading schedule; the bot starts when the window opens.")
        }
        Err(e) => {
            error!(error = %e, "Bot failed to start");
            return Err(e.into());
        }
    }

    // -- Main loop -------------------------------------------------------

    let mut status_tick =
        tokio::time::interval(Duration::from_secs(cfg.runner.status_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = status_tick.tick() => log_status(&bot),
            event = events.recv() => match event {
                Ok(e) if e.kind == EventKind::StatusChanged && is_finished(&bot) => {
                    info!(status = %bot.status(), "Bot halted");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    bot.stop();

    // -- Persist ---------------------------------------------------------

    if let Err(e) = storage::save_statistics(&bot.statistics(), Some(&cfg.runner.statistics_path)) {
        error!(error = %e, "Failed to save statistics");
    }
    storage::save_configuration(&bot.configuration(), Some(&cfg.runner.configuration_path))?;

    let session = bot.session();
    let perf = bot.performance();
    info!(
        trades = perf.trades,
        win_rate = format!("{:.1}%", perf.win_rate),
        pnl = format!("{:+.2}", session.total_profit),
        balance = format!("{:.2}", session.current_balance),
        reason = ?bot.last_stop_reason(),
        "STAKEFLOW shut down cleanly."
    );

    Ok(())
}

/// Nothing left to do: the run ended and no timer can restart it.
fn is_finished(bot: &BotController) -> bool {
    match bot.status() {
        BotStatus::Stopped | BotStatus::Error => true,
        BotStatus::Idle => bot.pending_timers() == 0,
        BotStatus::Started | BotStatus::Paused => false,
    }
}

/// Log one bot notification at a level matching its kind.
fn log_event(event: &BotEvent) {
    match event.kind {
        EventKind::Error | EventKind::EmergencyStop | EventKind::RiskLimitHit => {
            warn!(kind = %event.kind, data = ?event.data, "{}", event.message)
        }
        EventKind::ScheduleCheck | EventKind::StakeUpdated => {
            debug!(kind = %event.kind, "{}", event.message)
        }
        _ => info!(kind = %event.kind, "{}", event.message),
    }
}

/// Periodic one-line summary.
fn log_status(bot: &BotController) {
    let session = bot.session();
    info!(
        status = %bot.status(),
        trades = session.total_trades,
        wins = session.wins,
        losses = session.losses,
        stake = format!("{:.2}", session.current_stake),
        pnl = format!("{:+.2}", session.total_profit),
        balance = format!("{:.2}", session.current_balance),
        "Status"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stakeflow=info"));

    let json_logging = std::env::var("STAKEFLOW_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
