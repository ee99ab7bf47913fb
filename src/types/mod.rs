//! Core data types for the Pomodoro Timer.
//!
//! This module defines the data structures used for:
//! - Authoritative timer state owned by the daemon
//! - The persisted projection written to the state store
//! - IPC request/response serialization
//! - Broadcast events pushed to subscribed viewers

use serde::{Deserialize, Serialize};

use crate::clock::{remaining_seconds, Millis};
use crate::cycle::{self, SessionKind};

/// Store key under which the persisted state lives.
pub const STATE_KEY: &str = "pomodoroState";

/// Smallest accepted `SET_TIME` value in seconds.
pub const MIN_SET_TIME_SECS: u32 = 1;

/// Largest accepted `SET_TIME` value in seconds (2 hours).
pub const MAX_SET_TIME_SECS: u32 = 7200;

// ============================================================================
// TimerState
// ============================================================================

/// Authoritative timer state. Only the daemon mutates it.
///
/// While `is_running` is true, `end_time` is set and the remaining time is
/// derived from it; `time_left` is only a snapshot taken at start. While idle,
/// `time_left` is the truth and `end_time` is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub is_running: bool,
    /// Instant the current run segment began
    pub start_time: Option<Millis>,
    /// Instant the countdown reaches zero if uninterrupted
    pub end_time: Option<Millis>,
    /// Instant of the most recent pause
    pub paused_at: Option<Millis>,
    /// Cumulative paused seconds
    pub paused_duration: u64,
    /// Seconds remaining (authoritative only while idle)
    pub time_left: u32,
    pub session_type: SessionKind,
    /// Position in the eight-step cycle (1..=8)
    pub cycle_position: u8,
    pub last_update_time: Millis,
}

impl TimerState {
    /// Creates a fresh idle work session at cycle position 1.
    pub fn new(now: Millis) -> Self {
        Self {
            is_running: false,
            start_time: None,
            end_time: None,
            paused_at: None,
            paused_duration: 0,
            time_left: cycle::duration_for_kind(SessionKind::Work),
            session_type: SessionKind::Work,
            cycle_position: 1,
            last_update_time: now,
        }
    }

    /// Seconds left as of `now`.
    pub fn remaining_at(&self, now: Millis) -> u32 {
        match (self.is_running, self.end_time) {
            (true, Some(end_time)) => remaining_seconds(end_time, now),
            _ => self.time_left,
        }
    }

    /// Builds the persisted projection, stamped with `now`.
    pub fn to_persisted(&self, now: Millis) -> PersistedState {
        PersistedState {
            time_left: self.time_left,
            is_running: self.is_running,
            last_save_time: now,
            session_type: self.session_type,
            cycle_position: self.cycle_position,
            start_time: self.start_time,
            end_time: self.end_time,
            paused_at: self.paused_at,
            paused_duration: self.paused_duration,
        }
    }

    /// Rebuilds state from a persisted record.
    ///
    /// An out-of-range cycle position falls back to position 1 and the
    /// session kind is always re-derived from the position.
    pub fn from_persisted(persisted: &PersistedState, now: Millis) -> Self {
        let cycle_position = if cycle::is_valid_position(persisted.cycle_position) {
            persisted.cycle_position
        } else {
            tracing::warn!(
                "保存された周期位置が不正です ({}), 1に戻します",
                persisted.cycle_position
            );
            1
        };

        Self {
            is_running: persisted.is_running,
            start_time: persisted.start_time,
            end_time: persisted.end_time,
            paused_at: persisted.paused_at,
            paused_duration: persisted.paused_duration,
            time_left: persisted.time_left,
            session_type: cycle::session_kind_for_position(cycle_position),
            cycle_position,
            last_update_time: now,
        }
    }

    /// Builds the lightweight broadcast snapshot as of `now`.
    pub fn sync_snapshot(&self, now: Millis) -> SyncSnapshot {
        SyncSnapshot {
            end_time: self.end_time,
            session_type: self.session_type,
            cycle_position: self.cycle_position,
            is_running: self.is_running,
            time_left: self.remaining_at(now),
        }
    }
}

// ============================================================================
// PersistedState
// ============================================================================

/// Serializable projection of [`TimerState`] stored under [`STATE_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub time_left: u32,
    pub is_running: bool,
    pub last_save_time: Millis,
    pub session_type: SessionKind,
    pub cycle_position: u8,
    pub start_time: Option<Millis>,
    pub end_time: Option<Millis>,
    pub paused_at: Option<Millis>,
    #[serde(default)]
    pub paused_duration: u64,
}

impl PersistedState {
    /// Seconds left as of `now`, using the same rule as the daemon.
    pub fn remaining_at(&self, now: Millis) -> u32 {
        match (self.is_running, self.end_time) {
            (true, Some(end_time)) => remaining_seconds(end_time, now),
            _ => self.time_left,
        }
    }
}

// ============================================================================
// SyncSnapshot
// ============================================================================

/// Periodic broadcast payload (`STATE_SYNC`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub end_time: Option<Millis>,
    pub session_type: SessionKind,
    pub cycle_position: u8,
    pub is_running: bool,
    pub time_left: u32,
}

// ============================================================================
// Preset
// ============================================================================

/// Fixed durations offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// 25 minutes
    Pomodoro,
    /// 5 minutes
    Short,
    /// 15 minutes
    Long,
    /// 50 minutes
    Deep,
}

impl Preset {
    /// Returns the preset duration in seconds.
    pub fn seconds(self) -> u32 {
        match self {
            Preset::Pomodoro => 1500,
            Preset::Short => 300,
            Preset::Long => 900,
            Preset::Deep => 3000,
        }
    }

    /// Maps the viewer's number keys (`1`..=`4`) to presets.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(Preset::Pomodoro),
            '2' => Some(Preset::Short),
            '3' => Some(Preset::Long),
            '4' => Some(Preset::Deep),
            _ => None,
        }
    }
}

// ============================================================================
// IPC Types
// ============================================================================

/// IPC request from a viewer or CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpcRequest {
    /// Start (or resume) the countdown
    StartTimer,
    /// Pause the countdown
    PauseTimer,
    /// Return to a fresh work session at position 1
    ResetTimer,
    /// Set the idle countdown length
    SetTime {
        #[serde(rename = "timeLeft")]
        time_left: u32,
    },
    /// Reset, then set the countdown length
    SetTimeAndReset {
        #[serde(rename = "timeLeft")]
        time_left: u32,
    },
    /// Ask the daemon to persist and broadcast its current state again
    GetState,
    /// Move to a cycle position
    JumpToPosition { position: u8 },
    /// Turn the connection into a push stream of [`ServiceEvent`]s
    Subscribe,
}

impl IpcRequest {
    /// Returns the wire tag of the request.
    pub fn as_str(&self) -> &'static str {
        match self {
            IpcRequest::StartTimer => "START_TIMER",
            IpcRequest::PauseTimer => "PAUSE_TIMER",
            IpcRequest::ResetTimer => "RESET_TIMER",
            IpcRequest::SetTime { .. } => "SET_TIME",
            IpcRequest::SetTimeAndReset { .. } => "SET_TIME_AND_RESET",
            IpcRequest::GetState => "GET_STATE",
            IpcRequest::JumpToPosition { .. } => "JUMP_TO_POSITION",
            IpcRequest::Subscribe => "SUBSCRIBE",
        }
    }
}

/// Event pushed from the daemon to subscribed viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEvent {
    /// Periodic (and post-transition) snapshot
    StateSync(SyncSnapshot),
    /// The persisted state was written
    StateChanged {
        #[serde(rename = "oldValue")]
        old_value: Option<PersistedState>,
        #[serde(rename = "newValue")]
        new_value: PersistedState,
    },
}

/// Response data for IPC responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// State as persisted after the command
    #[serde(flatten)]
    pub state: PersistedState,
    /// Remaining seconds at reply time
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u32,
}

impl ResponseData {
    /// Creates response data from timer state.
    pub fn from_timer_state(state: &TimerState, now: Millis) -> Self {
        Self {
            state: state.to_persisted(now),
            remaining_seconds: state.remaining_at(now),
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Optional response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// Returns true for error responses.
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

// ============================================================================
// Tests
// ============================================================================
