//! Display surfaces for the viewer.
//!
//! Text generation is platform-independent and fully testable; the terminal
//! surface only decides how the line reaches the screen.

use std::io::{IsTerminal, Write};
#[cfg(any(test, feature = "test-utils"))]
use std::sync::{Arc, Mutex};

use crate::cycle::{SessionKind, CYCLE_LENGTH};

use super::error::ViewerError;

// ============================================================================
// Constants
// ============================================================================

/// Emoji for work session
const WORKING_EMOJI: &str = "🍅";

/// Emoji for break session
const BREAK_EMOJI: &str = "☕";

/// Emoji for a countdown that is not running
const STOPPED_EMOJI: &str = "⏸";

// ============================================================================
// Frame
// ============================================================================

/// Everything one repaint shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub session_type: SessionKind,
    pub cycle_position: u8,
    pub is_running: bool,
    pub time_left: u32,
}

/// Japanese label for a session kind.
pub fn session_label(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Work => "作業",
        SessionKind::ShortBreak => "短い休憩",
        SessionKind::LongBreak => "長い休憩",
    }
}

/// Formats remaining time as MM:SS string.
pub fn format_time(remaining_seconds: u32) -> String {
    let minutes = remaining_seconds / 60;
    let seconds = remaining_seconds % 60;
    format!("{:02}:{:02}", minutes, seconds)
}

/// Renders a frame as one status line.
///
/// Format:
/// - Running work: "🍅 MM:SS 作業 [n/8]"
/// - Running break: "☕ MM:SS 短い休憩 [n/8]"
/// - Not running: "⏸ MM:SS 作業 [n/8] 停止中"
pub fn format_frame(frame: &Frame) -> String {
    let emoji = if !frame.is_running {
        STOPPED_EMOJI
    } else if frame.session_type.is_break() {
        BREAK_EMOJI
    } else {
        WORKING_EMOJI
    };

    let mut line = format!(
        "{} {} {} [{}/{}]",
        emoji,
        format_time(frame.time_left),
        session_label(frame.session_type),
        frame.cycle_position,
        CYCLE_LENGTH
    );
    if !frame.is_running {
        line.push_str(" 停止中");
    }
    line
}

// ============================================================================
// Surface
// ============================================================================

/// Where the viewer paints frames.
pub trait Surface: Send {
    fn render(&mut self, frame: &Frame) -> std::io::Result<()>;
}

/// Single-line status display on an interactive terminal.
#[derive(Debug)]
pub struct TerminalSurface {
    stdout: std::io::Stdout,
}

impl TerminalSurface {
    /// Opens the terminal surface.
    ///
    /// # Errors
    ///
    /// Returns [`ViewerError::SurfaceUnavailable`] if stdout is not a terminal.
    pub fn open() -> Result<Self, ViewerError> {
        let stdout = std::io::stdout();
        if !stdout.is_terminal() {
            return Err(ViewerError::SurfaceUnavailable(
                "標準出力が端末ではありません (--plain を指定してください)".to_string(),
            ));
        }
        Ok(Self { stdout })
    }
}

impl Surface for TerminalSurface {
    fn render(&mut self, frame: &Frame) -> std::io::Result<()> {
        let mut out = self.stdout.lock();
        write!(out, "\r\x1b[2K{}", format_frame(frame))?;
        out.flush()
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = writeln!(self.stdout);
    }
}

/// Line-per-change output for pipes and logs.
#[derive(Debug, Default)]
pub struct PlainSurface {
    last_line: Option<String>,
}

impl PlainSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Surface for PlainSurface {
    fn render(&mut self, frame: &Frame) -> std::io::Result<()> {
        let line = format_frame(frame);
        if self.last_line.as_deref() == Some(line.as_str()) {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        self.last_line = Some(line);
        Ok(())
    }
}

/// Surface that keeps every frame, shared across clones.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    frames: Arc<Mutex<Vec<Frame>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Surface for RecordingSurface {
    fn render(&mut self, frame: &Frame) -> std::io::Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.clone());
        Ok(())
    }
}
