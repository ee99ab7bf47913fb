//! Viewer for the Pomodoro Timer.
//!
//! A viewer mirrors the daemon's state and repaints it locally:
//! - `reconciler`: Display state mirror with drift correction
//! - `refresh`: One-second repaint loop
//! - `surface`: Terminal and plain-text output
//! - `input`: Key-to-command mapping
//! - `link`: Transport to the daemon
//!
//! # Architecture
//!
//! The viewer is a single task driven by four inputs: the repaint tick, the
//! daemon's event stream, user input lines and a reconnect timer. It paints
//! from the state file first so something plausible shows even when the
//! daemon is not running, and it never treats an unreachable daemon as an
//! error.

pub mod error;
pub mod input;
pub mod link;
pub mod reconciler;
pub mod refresh;
pub mod surface;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::Config;
use crate::store::StateStore;
use crate::types::{IpcRequest, PersistedState, ServiceEvent};

pub use error::ViewerError;
pub use input::{ViewerAction, KEY_HELP};
pub use link::{EventStream, ServiceLink};
#[cfg(any(test, feature = "test-utils"))]
pub use link::MockCommandSink;
pub use reconciler::{DisplayReconciler, DisplayState};
pub use refresh::RefreshLoop;
pub use surface::{Frame, PlainSurface, Surface, TerminalSurface};
#[cfg(any(test, feature = "test-utils"))]
pub use surface::RecordingSurface;

/// Delay between subscription attempts while the daemon is unreachable.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// What the viewer does after handling an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

// ============================================================================
// Viewer
// ============================================================================

/// One viewer instance.
pub struct Viewer<L: ServiceLink, U: Surface> {
    reconciler: DisplayReconciler,
    link: Arc<L>,
    surface: U,
    events: Option<EventStream>,
    /// Command batches for the sender task, delivered in input order
    outbox: mpsc::UnboundedSender<Vec<IpcRequest>>,
    reconnect_interval: Duration,
}

impl<L: ServiceLink, U: Surface> Viewer<L, U> {
    /// Paints the stored state, then connects to the daemon.
    ///
    /// An unreachable daemon is expected here and only logged.
    pub async fn init<S: StateStore>(
        store: &S,
        link: Arc<L>,
        surface: U,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let (outbox, batches) = mpsc::unbounded_channel();
        tokio::spawn(send_commands(Arc::clone(&link), batches));

        let mut viewer = Self {
            reconciler: DisplayReconciler::new(
                clock,
                config.drift_threshold_ms,
                config.refresh_interval,
            ),
            link,
            surface,
            events: None,
            outbox,
            reconnect_interval: RECONNECT_INTERVAL,
        };

        match load_stored_state(store).await {
            Some(persisted) => viewer.reconciler.sync_display_state(&persisted),
            None => tracing::debug!("保存された状態がないため既定値を表示します"),
        }
        viewer.render();
        viewer.connect().await;
        viewer
    }

    /// Overrides the reconnect delay.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn reconciler(&self) -> &DisplayReconciler {
        &self.reconciler
    }

    /// Returns true while an event subscription is open.
    pub fn is_connected(&self) -> bool {
        self.events.is_some()
    }

    /// Subscribes to daemon events and asks for a fresh state.
    async fn connect(&mut self) {
        match self.link.subscribe().await {
            Ok(stream) => {
                tracing::debug!("Daemonのイベントを購読しました");
                self.events = Some(stream);
            }
            Err(e) => tracing::debug!("Daemonに接続できません。保存済みの状態を表示します: {:#}", e),
        }

        if let Err(e) = self.link.send(IpcRequest::GetState).await {
            tracing::debug!("GET_STATEを送信できませんでした: {:#}", e);
        }
    }

    /// Applies one pushed event and repaints.
    pub fn on_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::StateSync(snapshot) => self.reconciler.handle_sync_message(&snapshot),
            ServiceEvent::StateChanged { new_value, .. } => {
                self.reconciler.sync_display_state(&new_value);
            }
        }
        self.render();
    }

    /// Paints the current frame. Paint failures are logged.
    pub fn render(&mut self) {
        let frame = self.reconciler.frame();
        if let Err(e) = self.surface.render(&frame) {
            tracing::warn!("画面を更新できませんでした: {}", e);
        }
    }

    /// Queues the commands for `action` without waiting for delivery.
    ///
    /// Actions reach the daemon in the order they were typed.
    pub fn dispatch(&self, action: ViewerAction) {
        let requests = action.requests();
        if requests.is_empty() {
            return;
        }
        if self.outbox.send(requests).is_err() {
            tracing::warn!("送信タスクが終了しているため{}を送れません", action);
        }
    }

    /// Handles one line of user input.
    pub fn handle_input(&mut self, line: &str) -> Control {
        match ViewerAction::from_input(line) {
            Some(ViewerAction::Quit) => Control::Quit,
            Some(action) => {
                tracing::debug!("操作: {}", action);
                self.dispatch(action);
                Control::Continue
            }
            None => {
                if !line.trim().is_empty() {
                    tracing::debug!("不明な入力です: {:?}", line.trim());
                }
                Control::Continue
            }
        }
    }

    /// Runs until the user quits or Ctrl-C arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ViewerError::Input`] if reading `input` fails.
    pub async fn run<R>(mut self, input: R) -> Result<(), ViewerError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;

        let period = self.reconnect_interval;
        let mut reconnect = tokio::time::interval_at(Instant::now() + period, period);
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let result = loop {
            tokio::select! {
                () = self.reconciler.refresh_tick() => self.render(),
                event = next_event(&mut self.events), if self.events.is_some() => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        tracing::info!("Daemonとの接続が切れました。再接続を待ちます");
                        self.events = None;
                    }
                },
                _ = reconnect.tick(), if self.events.is_none() => self.connect().await,
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => {
                        if self.handle_input(&line) == Control::Quit {
                            break Ok(());
                        }
                    }
                    Ok(None) => input_open = false,
                    Err(e) => break Err(ViewerError::Input(e)),
                },
                _ = &mut ctrl_c => break Ok(()),
            }
        };

        self.teardown();
        result
    }

    /// Stops the repaint loop and drops the subscription.
    pub fn teardown(&mut self) {
        self.reconciler.teardown();
        self.events = None;
    }
}

impl<L: ServiceLink, U: Surface> Drop for Viewer<L, U> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Delivers queued batches one at a time.
///
/// Within a batch the first failure is logged and the rest are dropped.
async fn send_commands<L: ServiceLink>(
    link: Arc<L>,
    mut batches: mpsc::UnboundedReceiver<Vec<IpcRequest>>,
) {
    while let Some(requests) = batches.recv().await {
        for request in requests {
            let name = request.as_str();
            if let Err(e) = link.send(request).await {
                tracing::warn!("{}を送信できませんでした: {:#}", name, e);
                break;
            }
        }
    }
}

async fn next_event(events: &mut Option<EventStream>) -> Option<ServiceEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Reads the stored state, retrying once.
async fn load_stored_state<S: StateStore>(store: &S) -> Option<PersistedState> {
    let result = match store.load().await {
        Ok(persisted) => Ok(persisted),
        Err(e) => {
            tracing::debug!("状態の読み込みを再試行します: {}", e);
            store.load().await
        }
    };
    result.unwrap_or_else(|e| {
        tracing::warn!("保存された状態を読み込めません: {}", e);
        None
    })
}
