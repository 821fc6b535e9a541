//! Timer scheduler.
//!
//! Every delayed action a bot takes (next tick, monitors, cooldowns,
//! runtime limit) is a token scheduled here. A fired timer delivers its
//! handle on a channel; the owner must `acknowledge` it before acting.
//! Acknowledgement fails for handles cancelled in the meantime, so a
//! timer cancelled under the owner's lock never acts afterwards.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerToken {
    Tick,
    ScheduleMonitor,
    PeriodicReset,
    Cooldown,
    RecoveryCooldown,
    MaxRuntime,
}

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    pub token: TimerToken,
}

pub struct Scheduler {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, (TimerToken, JoinHandle<()>)>>,
    fired_tx: mpsc::UnboundedSender<TimerHandle>,
}

impl Scheduler {
    /// New scheduler plus the receiver fired handles arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerHandle>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    /// Fire `token` after `delay`. Must be called inside a tokio runtime.
    pub fn schedule_after(&self, delay: Duration, token: TimerToken) -> TimerHandle {
        let mut pending = self.pending.lock();
        let handle = TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token,
        };
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(handle);
        });
        pending.insert(handle.id, (token, task));
        trace!(?token, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        handle
    }

    /// Cancel one timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        match self.pending.lock().remove(&handle.id) {
            Some((_, task)) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer carrying `token`.
    pub fn cancel_token(&self, token: TimerToken) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, (t, _))| *t == token)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some((_, task)) = pending.remove(id) {
                task.abort();
            }
        }
        ids.len()
    }

    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        for (_, (_, task)) in pending.drain() {
            task.abort();
        }
    }

    /// Claim a fired timer. False when it was cancelled after firing.
    pub fn acknowledge(&self, handle: TimerHandle) -> bool {
        self.pending.lock().remove(&handle.id).is_some()
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.pending.lock().values().any(|(t, _)| *t == token)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
