//! Display state mirror with drift correction.
//!
//! A viewer never computes authoritative state. It mirrors what the daemon
//! publishes and derives the seconds to show from the mirrored `end_time`.
//! Incoming deadlines are only adopted when they disagree with the local one
//! by more than the drift threshold, so repeated syncs that agree do not make
//! the displayed seconds jump.

use std::sync::Arc;

use tokio::time::Duration;

use crate::clock::{remaining_seconds, Clock, Millis};
use crate::cycle::SessionKind;
use crate::types::{PersistedState, SyncSnapshot};

use super::refresh::RefreshLoop;
use super::surface::Frame;

// ============================================================================
// DisplayState
// ============================================================================

/// Local, possibly stale mirror of the daemon's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub end_time: Option<Millis>,
    pub is_running: bool,
    pub session_type: SessionKind,
    pub cycle_position: u8,
    pub time_left: u32,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            end_time: None,
            is_running: false,
            session_type: SessionKind::Work,
            cycle_position: 1,
            time_left: SessionKind::Work.duration_secs(),
        }
    }
}

// ============================================================================
// DisplayReconciler
// ============================================================================

/// Applies daemon state to the local mirror and owns the repaint loop.
#[derive(Debug)]
pub struct DisplayReconciler {
    state: DisplayState,
    clock: Arc<dyn Clock>,
    drift_threshold_ms: u64,
    refresh: RefreshLoop,
}

impl DisplayReconciler {
    pub fn new(clock: Arc<dyn Clock>, drift_threshold_ms: u64, refresh_period: Duration) -> Self {
        Self {
            state: DisplayState::default(),
            clock,
            drift_threshold_ms,
            refresh: RefreshLoop::new(refresh_period),
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Applies a persisted record (store read or change notification).
    ///
    /// This path also decides whether the repaint loop runs.
    pub fn sync_display_state(&mut self, persisted: &PersistedState) {
        self.state.is_running = persisted.is_running;
        self.state.session_type = persisted.session_type;
        self.state.cycle_position = persisted.cycle_position;
        self.state.time_left = persisted.time_left;
        self.apply_end_time(persisted.is_running, persisted.end_time);

        if persisted.is_running {
            self.refresh.start();
        } else {
            self.refresh.stop();
        }
    }

    /// Applies a periodic sync broadcast. Never starts or stops the loop.
    pub fn handle_sync_message(&mut self, snapshot: &SyncSnapshot) {
        self.state.is_running = snapshot.is_running;
        self.state.session_type = snapshot.session_type;
        self.state.cycle_position = snapshot.cycle_position;
        self.state.time_left = snapshot.time_left;
        self.apply_end_time(snapshot.is_running, snapshot.end_time);
    }

    fn apply_end_time(&mut self, is_running: bool, incoming: Option<Millis>) {
        if !is_running {
            self.state.end_time = None;
            return;
        }
        let Some(incoming) = incoming else {
            return;
        };

        match self.state.end_time {
            Some(local) if local.abs_diff(incoming) <= self.drift_threshold_ms => {}
            Some(local) => {
                tracing::debug!(
                    "終了時刻のずれを補正します: {}ms",
                    local.abs_diff(incoming)
                );
                self.state.end_time = Some(incoming);
            }
            None => self.state.end_time = Some(incoming),
        }
    }

    /// Seconds to show right now.
    ///
    /// A paused value is shown as-is. A running countdown without a known
    /// deadline falls back to the mirrored `time_left`.
    pub fn calculate_display_time_left(&self) -> u32 {
        match (self.state.is_running, self.state.end_time) {
            (true, Some(end_time)) => remaining_seconds(end_time, self.clock.now_millis()),
            _ => self.state.time_left,
        }
    }

    /// Builds the frame to paint.
    pub fn frame(&self) -> Frame {
        Frame {
            session_type: self.state.session_type,
            cycle_position: self.state.cycle_position,
            is_running: self.state.is_running,
            time_left: self.calculate_display_time_left(),
        }
    }

    /// Waits for the next repaint instant.
    pub async fn refresh_tick(&mut self) {
        self.refresh.tick().await;
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_active()
    }

    /// Stops the repaint loop.
    pub fn teardown(&mut self) {
        self.refresh.stop();
    }
}
