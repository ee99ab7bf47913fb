//! Daemon module for the Pomodoro Timer.
//!
//! This module contains the authoritative side of the timer:
//! - `timer`: Timer engine with state transitions and recovery
//! - `service`: Single-owner event loop around the engine
//! - `ipc`: Unix socket server and subscription streams
//! - `alarm`: One-shot alarms at absolute instants
//! - `notifier`: Completion notifications

pub mod alarm;
pub mod ipc;
pub mod notifier;
pub mod service;
pub mod timer;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::store::FileStore;
use crate::types::ServiceEvent;

pub use alarm::{AlarmScheduler, TokioAlarmScheduler, COMPLETION_ALARM};
pub use ipc::{IpcServer, RequestHandler};
pub use notifier::{CommandNotifier, CompletionNotifier, LogNotifier};
pub use service::{ServiceHandle, TimerService};
pub use timer::{Outcome, RestoreOutcome, TimerEngine};

/// Capacity of the viewer broadcast hub.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Runs the daemon until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or signal handlers cannot
/// be installed.
pub async fn run(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(FileStore::new(&config.state_path));

    let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
    let alarms = Arc::new(TokioAlarmScheduler::new(Arc::clone(&clock), alarm_tx));

    let notifier: Arc<dyn CompletionNotifier> = match &config.notify_command {
        Some(command) => Arc::new(CommandNotifier::new(command.clone())),
        None => Arc::new(LogNotifier),
    };

    let (events, _) = broadcast::channel::<ServiceEvent>(EVENT_CHANNEL_CAPACITY);
    let engine = TimerEngine::new(clock, store, alarms, notifier, events.clone());
    let (service, handle) = TimerService::new(engine, alarm_rx, config.sync_interval);

    let server = IpcServer::new(&config.socket_path)?;
    let handler = Arc::new(RequestHandler::new(handle, events));

    tracing::info!(
        "Daemonを起動しました (socket: {}, state: {})",
        server.socket_path().display(),
        config.state_path.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service_task = tokio::spawn(service.run(wait_for(shutdown_rx.clone())));
    let server_task = tokio::spawn(server.serve(handler, wait_for(shutdown_rx)));

    shutdown_signal().await?;
    tracing::info!("シャットダウンします");
    let _ = shutdown_tx.send(true);

    service_task.await.context("サービスタスクが異常終了しました")?;
    server_task.await.context("サーバータスクが異常終了しました")?;
    Ok(())
}

/// Resolves once `rx` observes `true` or its sender is dropped.
async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("SIGTERMハンドラを登録できません")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("SIGINTを待機できません")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
