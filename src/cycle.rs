//! Session cycle policy.
//!
//! The timer walks a fixed eight-step loop:
//! work, short break, work, short break, work, short break, work, long break.

use serde::{Deserialize, Serialize};

/// Number of positions in one full cycle.
pub const CYCLE_LENGTH: u8 = 8;

// ============================================================================
// SessionKind
// ============================================================================

/// Kind of session the timer is counting down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    /// Focused work
    #[default]
    Work,
    /// Short break between work sessions
    ShortBreak,
    /// Long break closing the cycle
    LongBreak,
}

impl SessionKind {
    /// Returns the fixed duration of this kind in seconds.
    pub fn duration_secs(self) -> u32 {
        match self {
            SessionKind::Work => 1500,
            SessionKind::ShortBreak => 300,
            SessionKind::LongBreak => 900,
        }
    }

    /// Returns the wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Work => "work",
            SessionKind::ShortBreak => "shortBreak",
            SessionKind::LongBreak => "longBreak",
        }
    }

    /// Returns true for both break kinds.
    pub fn is_break(self) -> bool {
        !matches!(self, SessionKind::Work)
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cycle functions
// ============================================================================

/// Maps a cycle position (1..=8) to its session kind.
///
/// Odd positions are work; position 8 is the long break; the other even
/// positions are short breaks.
pub fn session_kind_for_position(position: u8) -> SessionKind {
    if position % 2 == 1 {
        SessionKind::Work
    } else if position == CYCLE_LENGTH {
        SessionKind::LongBreak
    } else {
        SessionKind::ShortBreak
    }
}

/// Returns the duration of `kind` in seconds.
pub fn duration_for_kind(kind: SessionKind) -> u32 {
    kind.duration_secs()
}

/// Moves to the next position, wrapping 8 back to 1.
pub fn advance(position: u8) -> u8 {
    (position % CYCLE_LENGTH) + 1
}

/// Returns true if `position` is a valid cycle position.
pub fn is_valid_position(position: u8) -> bool {
    (1..=CYCLE_LENGTH).contains(&position)
}
