//! Pomodoro Timer Library
//!
//! This library provides the core functionality for the Pomodoro Timer CLI.
//! It includes:
//! - The eight-step work/break cycle and the end-time based countdown
//! - The daemon: timer engine, completion alarms, state sync broadcasts
//! - Persistent state stores
//! - Viewers that follow the daemon with local drift correction
//! - IPC server/client for daemon-CLI communication
//! - Configuration loading

pub mod cli;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod daemon;
pub mod store;
pub mod types;
pub mod viewer;

// Re-export commonly used types for convenience
pub use clock::{Clock, Millis, SystemClock};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
pub use config::{Config, ConfigError, Overrides};
pub use cycle::SessionKind;
pub use store::{FileStore, StateStore, StoreError};
#[cfg(any(test, feature = "test-utils"))]
pub use store::MemoryStore;
pub use types::{
    IpcRequest, IpcResponse, PersistedState, Preset, ResponseData, ServiceEvent, SyncSnapshot,
    TimerState,
};
