//! Session completion notifications.
//!
//! The daemon calls a [`CompletionNotifier`] when a session ends. Failures are
//! reported back to the caller, which logs them; they never hold up the
//! session transition.

use std::io::Write;
#[cfg(any(test, feature = "test-utils"))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(test, feature = "test-utils"))]
use std::sync::Mutex;

use thiserror::Error;

use crate::cycle::SessionKind;

/// Errors raised while opening a completion notification.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The notification command could not be started
    #[error("通知コマンドを起動できません: {0}")]
    SpawnFailed(String),

    /// Generic notification failure
    #[error("通知に失敗しました: {0}")]
    Failed(String),
}

/// Opens a notification surface when a session completes.
pub trait CompletionNotifier: Send + Sync {
    /// Fire-and-forget: returns once the notification has been handed off.
    fn open(&self, completed: SessionKind, next: SessionKind) -> Result<(), NotifierError>;
}

/// Human-readable message for a completed session.
pub fn completion_message(completed: SessionKind, next: SessionKind) -> String {
    let done = match completed {
        SessionKind::Work => "作業セッションが終了しました",
        SessionKind::ShortBreak => "休憩が終了しました",
        SessionKind::LongBreak => "長い休憩が終了しました",
    };
    let upcoming = match next {
        SessionKind::Work => "次は作業です",
        SessionKind::ShortBreak => "次は短い休憩です",
        SessionKind::LongBreak => "次は長い休憩です",
    };
    format!("{done}。{upcoming}")
}

// ============================================================================
// LogNotifier
// ============================================================================

/// Logs the completion and rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn open(&self, completed: SessionKind, next: SessionKind) -> Result<(), NotifierError> {
        tracing::info!("{}", completion_message(completed, next));
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|()| stderr.flush())
            .map_err(|e| NotifierError::Failed(e.to_string()))
    }
}

// ============================================================================
// CommandNotifier
// ============================================================================

/// Runs a user-configured shell command on completion.
///
/// The command sees `POMODORO_COMPLETED`, `POMODORO_NEXT` and
/// `POMODORO_MESSAGE` in its environment. It is not waited for.
#[derive(Debug)]
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl CompletionNotifier for CommandNotifier {
    fn open(&self, completed: SessionKind, next: SessionKind) -> Result<(), NotifierError> {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("POMODORO_COMPLETED", completed.as_str())
            .env("POMODORO_NEXT", next.as_str())
            .env("POMODORO_MESSAGE", completion_message(completed, next))
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| NotifierError::SpawnFailed(format!("{}: {e}", self.command)))?;

        tracing::debug!("通知コマンドを起動しました (pid {:?})", child.id());
        Ok(())
    }
}

// ============================================================================
// MockNotifier
// ============================================================================

/// Notifier that records calls, optionally failing each one.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockNotifier {
    opened: Mutex<Vec<(SessionKind, SessionKind)>>,
    should_fail: AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Returns `(completed, next)` for every call, including failed ones.
    #[must_use]
    pub fn opened(&self) -> Vec<(SessionKind, SessionKind)> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl CompletionNotifier for MockNotifier {
    fn open(&self, completed: SessionKind, next: SessionKind) -> Result<(), NotifierError> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((completed, next));
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotifierError::Failed("Mock failure".to_string()));
        }
        Ok(())
    }
}
