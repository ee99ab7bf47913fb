//! Persistence for the timer state.
//!
//! The store is a single-key document: the persisted timer state lives under
//! [`STATE_KEY`](crate::types::STATE_KEY). Every write emits a [`StoreChange`]
//! to in-process subscribers, carrying the old and new values.
//!
//! - [`FileStore`]: JSON file written atomically, used by the daemon and read
//!   directly by viewers
//! - `MemoryStore`: in-memory store for tests (`test-utils` feature)

mod file;

use std::future::Future;
#[cfg(any(test, feature = "test-utils"))]
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::PersistedState;

pub use file::FileStore;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// StoreError
// ============================================================================

/// Errors raised by state stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the backing medium failed
    #[error("状態の読み込みに失敗しました: {0}")]
    Read(String),

    /// Writing the backing medium failed
    #[error("状態の書き込みに失敗しました: {0}")]
    Write(String),

    /// The stored document could not be parsed
    #[error("保存された状態が壊れています: {0}")]
    Corrupt(String),
}

// ============================================================================
// StoreChange
// ============================================================================

/// Persistence-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub old_value: Option<PersistedState>,
    pub new_value: PersistedState,
}

// ============================================================================
// StateStore
// ============================================================================

/// Asynchronous key-value store holding the persisted timer state.
pub trait StateStore: Send + Sync + 'static {
    /// Reads the persisted state, `None` if nothing was ever written.
    fn load(&self) -> impl Future<Output = Result<Option<PersistedState>, StoreError>> + Send;

    /// Writes the persisted state and notifies subscribers.
    fn save(&self, state: &PersistedState) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Subscribes to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory state store with injectable read and write failures.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct MemoryStore {
    value: Mutex<Option<PersistedState>>,
    changes: broadcast::Sender<StoreChange>,
    fail_reads: Mutex<u32>,
    fail_writes: Mutex<u32>,
    writes: Mutex<u32>,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            value: Mutex::new(None),
            changes,
            fail_reads: Mutex::new(0),
            fail_writes: Mutex::new(0),
            writes: Mutex::new(0),
        }
    }

    /// Creates a store that already holds `state`.
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::new();
        *store.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
        store
    }

    /// Returns the current value without going through the async API.
    pub fn peek(&self) -> Option<PersistedState> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Makes the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        *self.fail_reads.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().unwrap_or_else(|e| e.into_inner());
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::Read("injected failure".to_string()));
        }
        Ok(self.peek())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if Self::take_failure(&self.fail_writes) {
            return Err(StoreError::Write("injected failure".to_string()));
        }
        let old_value = self
            .value
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(state.clone());
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        // No subscribers is fine
        let _ = self.changes.send(StoreChange {
            old_value,
            new_value: state.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
