//! Viewer's connection to the daemon.

use std::future::Future;
#[cfg(any(test, feature = "test-utils"))]
use std::sync::{Arc, Mutex};
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::types::{IpcRequest, ServiceEvent};

/// Capacity of an event stream's buffer.
const EVENT_STREAM_CAPACITY: usize = 64;

// ============================================================================
// EventStream
// ============================================================================

/// Events pushed by the daemon over one subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<ServiceEvent>,
}

impl EventStream {
    /// Creates a stream and the sender that feeds it.
    pub fn channel() -> (mpsc::Sender<ServiceEvent>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_STREAM_CAPACITY);
        (tx, Self { rx })
    }

    /// Next event, `None` once the subscription is gone.
    pub async fn next(&mut self) -> Option<ServiceEvent> {
        self.rx.recv().await
    }
}

// ============================================================================
// ServiceLink
// ============================================================================

/// Transport from a viewer to the daemon.
pub trait ServiceLink: Send + Sync + 'static {
    /// Delivers one command without retrying.
    fn send(&self, request: IpcRequest) -> impl Future<Output = Result<()>> + Send;

    /// Opens a push stream of daemon events.
    fn subscribe(&self) -> impl Future<Output = Result<EventStream>> + Send;
}

// ============================================================================
// MockCommandSink
// ============================================================================

/// Link that records commands and hands out test-controlled streams.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct MockCommandSink {
    sent: Arc<Mutex<Vec<IpcRequest>>>,
    unreachable: Arc<Mutex<bool>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<ServiceEvent>>>>,
    subscriptions_opened: Arc<Mutex<usize>>,
    next_send_delay: Arc<Mutex<Option<Duration>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockCommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send and subscribe fail as if the daemon were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap_or_else(|e| e.into_inner()) = unreachable;
    }

    /// Holds the next send for `delay` before recording it.
    pub fn delay_next_send(&self, delay: Duration) {
        *self.next_send_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Commands delivered so far.
    pub fn sent(&self) -> Vec<IpcRequest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of subscriptions opened so far.
    pub fn subscription_count(&self) -> usize {
        *self
            .subscriptions_opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Pushes `event` to the most recent subscription.
    pub async fn push(&self, event: ServiceEvent) -> bool {
        let tx = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Closes every open subscription.
    pub fn disconnect(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn is_unreachable(&self) -> bool {
        *self.unreachable.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl ServiceLink for MockCommandSink {
    async fn send(&self, request: IpcRequest) -> Result<()> {
        if self.is_unreachable() {
            anyhow::bail!("Daemonに接続できません");
        }
        let delay = self
            .next_send_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream> {
        if self.is_unreachable() {
            anyhow::bail!("Daemonに接続できません");
        }
        let (tx, stream) = EventStream::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        *self
            .subscriptions_opened
            .lock()
            .unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(stream)
    }
}
