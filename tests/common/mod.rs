//! Shared helpers for daemon-level tests.
//!
//! Runs a real service loop and IPC server on a temporary socket, with a
//! hand-driven clock and alarms fired by the test.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use pomodoro::cli::IpcClient;
use pomodoro::clock::ManualClock;
use pomodoro::daemon::alarm::{MockAlarmScheduler, COMPLETION_ALARM};
use pomodoro::daemon::notifier::MockNotifier;
use pomodoro::daemon::{IpcServer, RequestHandler, TimerEngine, TimerService};
use pomodoro::store::StateStore;
use pomodoro::types::{IpcResponse, ResponseData};

/// 2023-11-14T22:13:20Z
pub const T: u64 = 1_700_000_000_000;

/// Creates a temporary socket path for testing.
pub fn create_temp_socket_path() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pomodoro_test.sock");
    // Keep the directory so it's not deleted
    std::mem::forget(dir);
    path
}

/// A daemon running inside the test process.
pub struct TestDaemon<S: StateStore> {
    pub socket_path: PathBuf,
    pub clock: Arc<ManualClock>,
    pub store: Arc<S>,
    pub alarms: Arc<MockAlarmScheduler>,
    pub notifier: Arc<MockNotifier>,
    alarm_tx: mpsc::UnboundedSender<String>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: StateStore> TestDaemon<S> {
    /// Starts a daemon on a fresh socket.
    pub fn spawn(store: Arc<S>, clock: Arc<ManualClock>) -> Self {
        Self::spawn_at(create_temp_socket_path(), store, clock)
    }

    /// Starts a daemon listening on `socket_path`.
    pub fn spawn_at(socket_path: PathBuf, store: Arc<S>, clock: Arc<ManualClock>) -> Self {
        let alarms = Arc::new(MockAlarmScheduler::new());
        let notifier = Arc::new(MockNotifier::new());
        let (events, _) = broadcast::channel(64);

        let engine = TimerEngine::new(
            clock.clone(),
            store.clone(),
            alarms.clone(),
            notifier.clone(),
            events.clone(),
        );
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (service, handle) = TimerService::new(engine, alarm_rx, Duration::from_secs(30));

        let server = IpcServer::new(&socket_path).unwrap();
        let handler = Arc::new(RequestHandler::new(handle, events));

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(service.run(wait_for(stop_rx.clone()))),
            tokio::spawn(server.serve(handler, wait_for(stop_rx))),
        ];

        Self {
            socket_path,
            clock,
            store,
            alarms,
            notifier,
            alarm_tx,
            stop,
            tasks,
        }
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::new(&self.socket_path)
    }

    /// Delivers the completion alarm as the scheduler would.
    pub fn fire_completion_alarm(&self) {
        self.alarm_tx.send(COMPLETION_ALARM.to_string()).unwrap();
    }

    /// Stops the service and the server and waits for both.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Returns the response data, failing the test if there is none.
pub fn data(response: &IpcResponse) -> &ResponseData {
    response.data.as_ref().expect("response carries state")
}

/// Polls `GET_STATE` until `pred` holds, failing after two seconds.
pub async fn wait_for_state(client: &IpcClient, pred: impl Fn(&ResponseData) -> bool) -> ResponseData {
    for _ in 0..100 {
        let response = client.get_state().await.unwrap();
        if pred(data(&response)) {
            return data(&response).clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("state never reached the expected condition");
}
