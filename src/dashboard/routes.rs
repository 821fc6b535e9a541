//! Dashboard API route handlers.
//!
//! All endpoints return JSON snapshots taken from the shared `BotController`.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::config::BotConfiguration;
use crate::engine::accountant::{PerformanceReport, StatisticsAggregate};
use crate::engine::bot::BotController;
use crate::risk::{RiskState, StopReason};
use crate::strategy::recovery::RecoveryState;
use crate::types::{BotStatus, SessionState, StrategyStep, TradeResult};

/// Trades returned by `/api/trades`.
const MAX_TRADES: usize = 100;

pub type AppState = BotController;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub name: String,
    pub status: BotStatus,
    pub strategy: &'static str,
    pub symbol: String,
    pub current_stake: Decimal,
    pub balance: Decimal,
    pub total_profit: Decimal,
    pub total_trades: u32,
    pub win_rate: Decimal,
    pub consecutive_losses: u32,
    pub recovering: bool,
    pub safety_mode: bool,
    pub last_stop_reason: Option<StopReason>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskResponse {
    pub state: RiskState,
    pub recovery: RecoveryState,
    pub steps: Vec<StrategyStep>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(bot): State<AppState>) -> Json<StatusResponse> {
    let config = bot.configuration();
    let session = bot.session();
    let status = bot.status();
    let risk = bot.risk_state();
    let uptime = if status.is_running() {
        (chrono::Utc::now() - session.started_at).num_seconds().max(0)
    } else {
        0
    };

    Json(StatusResponse {
        id: bot.id(),
        name: config.name,
        status,
        strategy: config.strategy.id(),
        symbol: config.market.symbol,
        current_stake: session.current_stake,
        balance: session.current_balance,
        total_profit: session.total_profit,
        total_trades: session.total_trades,
        win_rate: session.win_rate(),
        consecutive_losses: session.consecutive_losses,
        recovering: bot.recovery_state().recovering,
        safety_mode: risk.safety_mode_until.is_some(),
        last_stop_reason: bot.last_stop_reason(),
        uptime_secs: uptime,
    })
}

/// GET /api/session
pub async fn get_session(State(bot): State<AppState>) -> Json<SessionState> {
    Json(bot.session())
}

/// GET /api/performance
pub async fn get_performance(State(bot): State<AppState>) -> Json<PerformanceReport> {
    Json(bot.performance())
}

/// GET /api/statistics
pub async fn get_statistics(State(bot): State<AppState>) -> Json<StatisticsAggregate> {
    Json(bot.statistics())
}

/// GET /api/trades, newest last.
pub async fn get_trades(State(bot): State<AppState>) -> Json<Vec<TradeResult>> {
    let trades = bot.trade_history();
    let start = trades.len().saturating_sub(MAX_TRADES);
    Json(trades[start..].to_vec())
}

/// GET /api/config
pub async fn get_config(State(bot): State<AppState>) -> Json<BotConfiguration> {
    Json(bot.configuration())
}

/// GET /api/risk
pub async fn get_risk(State(bot): State<AppState>) -> Json<RiskResponse> {
    Json(RiskResponse {
        state: bot.risk_state(),
        recovery: bot.recovery_state(),
        steps: bot.risk_steps(),
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
