//! One-shot alarm facility.
//!
//! Alarms are named and scheduled at an absolute wall-clock instant.
//! Scheduling a name that is already pending replaces it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::clock::{Clock, Millis};

/// Name of the alarm that ends the current session.
pub const COMPLETION_ALARM: &str = "pomodoroTimer";

/// Schedules named wake-ups at absolute instants.
pub trait AlarmScheduler: Send + Sync {
    /// Schedules `name` to fire at or after `at`, replacing any pending alarm
    /// with the same name.
    fn schedule_at(&self, name: &str, at: Millis);

    /// Cancels a pending alarm. Cancelling an unknown name is a no-op.
    fn cancel(&self, name: &str);
}

// ============================================================================
// TokioAlarmScheduler
// ============================================================================

/// Alarm scheduler backed by sleeping tokio tasks.
///
/// When an alarm fires its name is delivered on the channel handed to
/// [`TokioAlarmScheduler::new`], so the owner processes it in its own loop.
pub struct TokioAlarmScheduler {
    clock: Arc<dyn Clock>,
    fired_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioAlarmScheduler {
    pub fn new(clock: Arc<dyn Clock>, fired_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            clock,
            fired_tx,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if an alarm named `name` has not fired yet.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule_at(&self, name: &str, at: Millis) {
        let delay = Duration::from_millis(at.saturating_sub(self.clock.now_millis()));
        let fired_tx = self.fired_tx.clone();
        let alarm_name = name.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired_tx.send(alarm_name.clone()).is_err() {
                tracing::debug!("アラーム {} の受信側が終了しています", alarm_name);
            }
        });

        tracing::debug!("アラーム {} を {}ms 後に設定しました", name, delay.as_millis());

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel(&self, name: &str) {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("アラーム {} を解除しました", name);
        }
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// MockAlarmScheduler
// ============================================================================

/// Recorded alarm operation.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmCall {
    Schedule { name: String, at: Millis },
    Cancel { name: String },
}

/// Alarm scheduler that only records what it was asked to do.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockAlarmScheduler {
    scheduled: Mutex<HashMap<String, Millis>>,
    calls: Mutex<Vec<AlarmCall>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockAlarmScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instant `name` is scheduled for, if pending.
    #[must_use]
    pub fn scheduled(&self, name: &str) -> Option<Millis> {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// Returns every call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<AlarmCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl AlarmScheduler for MockAlarmScheduler {
    fn schedule_at(&self, name: &str, at: Millis) {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), at);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AlarmCall::Schedule {
                name: name.to_string(),
                at,
            });
    }

    fn cancel(&self, name: &str) {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AlarmCall::Cancel {
                name: name.to_string(),
            });
    }
}
