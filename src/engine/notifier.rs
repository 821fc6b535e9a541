//! Per-bot notification dispatch.
//!
//! Every state change a bot makes is published as a `BotEvent`, both to
//! registered callbacks and to a broadcast channel. A failing or
//! panicking callback is logged and skipped; it never reaches the trade
//! loop.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusChanged,
    TradeExecuted,
    TradeWon,
    TradeLost,
    StakeUpdated,
    RecoveryTriggered,
    RecoveryStepChanged,
    RiskLimitHit,
    StopLossTriggered,
    TakeProfitTriggered,
    CooldownStarted,
    CooldownEnded,
    ScheduleCheck,
    SchedulePaused,
    ScheduleResumed,
    EmergencyStop,
    MaxTradesReached,
    MaxRuntimeReached,
    StrategyReset,
    Error,
    Log,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub bot_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl BotEvent {
    pub fn new(
        kind: EventKind,
        bot_id: Uuid,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            bot_id,
            timestamp,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for BotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

pub type Callback = Arc<dyn Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Notifier {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback)>>,
    channel: broadcast::Sender<BotEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
            channel,
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BotEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(sid, _)| *sid != id);
        callbacks.len() != before
    }

    /// Receive events on a broadcast channel. Slow receivers lag and
    /// lose the oldest events.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<BotEvent> {
        self.channel.subscribe()
    }

    pub fn emit(&self, event: &BotEvent) {
        trace!(kind = %event.kind, message = %event.message, "Event");
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(kind = %event.kind, error = %e, "Event subscriber failed"),
                Err(_) => warn!(kind = %event.kind, "Event subscriber panicked"),
            }
        }
        let _ = self.channel.send(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
