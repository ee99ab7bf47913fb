//! Keyboard input for the viewer.
//!
//! Each line typed on stdin is mapped to one action. The mapping is
//! platform-independent; sending the resulting commands happens elsewhere.

use std::fmt;

use crate::types::{IpcRequest, Preset};

// ============================================================================
// ViewerAction
// ============================================================================

/// Actions a user can trigger from the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerAction {
    /// Start or resume the countdown
    Start,
    /// Pause the countdown
    Pause,
    /// Reset to the first work session
    Reset,
    /// Reset, set a preset duration and start
    Preset(Preset),
    /// Leave the viewer
    Quit,
}

impl fmt::Display for ViewerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerAction::Start => write!(f, "start"),
            ViewerAction::Pause => write!(f, "pause"),
            ViewerAction::Reset => write!(f, "reset"),
            ViewerAction::Preset(preset) => write!(f, "preset:{}", preset.seconds()),
            ViewerAction::Quit => write!(f, "quit"),
        }
    }
}

impl ViewerAction {
    /// Parses one input line. Leading and trailing whitespace is ignored.
    pub fn from_input(line: &str) -> Option<Self> {
        let mut chars = line.trim().chars();
        let key = chars.next()?;
        if chars.next().is_some() {
            return None;
        }

        match key.to_ascii_lowercase() {
            's' => Some(ViewerAction::Start),
            'p' => Some(ViewerAction::Pause),
            'r' => Some(ViewerAction::Reset),
            'q' => Some(ViewerAction::Quit),
            other => Preset::from_key(other).map(ViewerAction::Preset),
        }
    }

    /// Commands to send, in order. Empty for [`ViewerAction::Quit`].
    pub fn requests(self) -> Vec<IpcRequest> {
        match self {
            ViewerAction::Start => vec![IpcRequest::StartTimer],
            ViewerAction::Pause => vec![IpcRequest::PauseTimer],
            ViewerAction::Reset => vec![IpcRequest::ResetTimer],
            ViewerAction::Preset(preset) => preset_requests(preset),
            ViewerAction::Quit => Vec::new(),
        }
    }
}

/// The composite a preset expands to.
pub fn preset_requests(preset: Preset) -> Vec<IpcRequest> {
    vec![
        IpcRequest::ResetTimer,
        IpcRequest::SetTime {
            time_left: preset.seconds(),
        },
        IpcRequest::StartTimer,
    ]
}

/// One-line key help.
pub const KEY_HELP: &str = "s:開始 p:一時停止 r:リセット 1-4:プリセット q:終了";
