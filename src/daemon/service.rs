//! Single-owner service loop around the timer engine.
//!
//! Commands from socket connections, alarm deliveries, the periodic sync tick
//! and store change notifications are all processed one at a time on this
//! loop, so the engine never needs a lock.

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::store::StateStore;
use crate::types::{IpcRequest, IpcResponse, ResponseData, ServiceEvent};

use super::timer::{Outcome, TimerEngine};

/// Capacity of the request queue.
const REQUEST_QUEUE_CAPACITY: usize = 32;

// ============================================================================
// ServiceHandle
// ============================================================================

/// Message delivered to the service loop.
#[derive(Debug)]
pub enum ServiceMessage {
    /// Execute a command and reply with the result
    Request {
        request: IpcRequest,
        reply: oneshot::Sender<IpcResponse>,
    },
}

/// Cloneable handle for submitting commands to a running [`TimerService`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<ServiceMessage>,
}

impl ServiceHandle {
    /// Submits `request` and waits for the service's reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the service loop has stopped.
    pub async fn request(&self, request: IpcRequest) -> Result<IpcResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServiceMessage::Request { request, reply })
            .await
            .map_err(|_| anyhow!("サービスが停止しています"))?;
        rx.await.context("サービスが応答しませんでした")
    }
}

// ============================================================================
// TimerService
// ============================================================================

/// Event loop owning the [`TimerEngine`].
pub struct TimerService<S: StateStore> {
    engine: TimerEngine<S>,
    requests: mpsc::Receiver<ServiceMessage>,
    alarms: mpsc::UnboundedReceiver<String>,
    sync_interval: Duration,
}

impl<S: StateStore> TimerService<S> {
    /// Wraps `engine`. `alarms` receives names from the engine's alarm scheduler.
    pub fn new(
        engine: TimerEngine<S>,
        alarms: mpsc::UnboundedReceiver<String>,
        sync_interval: Duration,
    ) -> (Self, ServiceHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let service = Self {
            engine,
            requests,
            alarms,
            sync_interval,
        };
        (service, ServiceHandle { tx })
    }

    /// Restores persisted state, then serves until `shutdown` resolves or every
    /// handle is dropped.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut changes = self.engine.store().subscribe();
        let mut changes_open = true;

        let outcome = self.engine.restore().await;
        tracing::info!("状態を復元しました: {:?}", outcome);

        let period = self.sync_interval;
        let mut sync = tokio::time::interval_at(Instant::now() + period, period);
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("サービスを停止します");
                    break;
                }
                message = self.requests.recv() => {
                    let Some(ServiceMessage::Request { request, reply }) = message else {
                        tracing::debug!("全てのハンドルが破棄されました");
                        break;
                    };
                    let response = self.dispatch(request).await;
                    if reply.send(response).is_err() {
                        tracing::debug!("応答の送信先が既に閉じています");
                    }
                }
                Some(name) = self.alarms.recv() => {
                    self.engine.handle_alarm(&name).await;
                }
                _ = sync.tick() => {
                    self.engine.sync_tick();
                }
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        let event = ServiceEvent::StateChanged {
                            old_value: change.old_value,
                            new_value: change.new_value,
                        };
                        if self.engine.events().send(event).is_err() {
                            tracing::trace!("変更を受信するビューアがいません");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("状態変更通知を{}件取りこぼしました", skipped);
                    }
                    Err(RecvError::Closed) => {
                        changes_open = false;
                    }
                },
            }
        }
    }

    /// Executes one command against the engine.
    async fn dispatch(&mut self, request: IpcRequest) -> IpcResponse {
        tracing::debug!("リクエストを受信しました: {}", request.as_str());

        let result = match request {
            IpcRequest::StartTimer => Ok((
                self.engine.start().await,
                "タイマーを開始しました",
                "タイマーは既に実行中です",
            )),
            IpcRequest::PauseTimer => Ok((
                self.engine.pause().await,
                "タイマーを一時停止しました",
                "タイマーは実行されていません",
            )),
            IpcRequest::ResetTimer => Ok((
                self.engine.reset().await,
                "タイマーをリセットしました",
                "",
            )),
            IpcRequest::SetTime { time_left } => {
                self.engine.set_time(time_left).await.map(|outcome| {
                    (
                        outcome,
                        "時間を設定しました",
                        "実行中は時間を変更できません",
                    )
                })
            }
            IpcRequest::SetTimeAndReset { time_left } => self
                .engine
                .set_time_and_reset(time_left)
                .await
                .map(|outcome| (outcome, "リセットして時間を設定しました", "")),
            IpcRequest::GetState => Ok((self.engine.resend_state().await, "", "")),
            IpcRequest::JumpToPosition { position } => self
                .engine
                .jump_to_position(position)
                .await
                .map(|outcome| (outcome, "周期位置を移動しました", "")),
            IpcRequest::Subscribe => {
                return IpcResponse::error("SUBSCRIBEは接続単位で処理されます");
            }
        };

        match result {
            Ok((outcome, applied, ignored)) => {
                let message = match outcome {
                    Outcome::Applied => applied,
                    Outcome::Ignored => ignored,
                };
                let now = self.engine.clock().now_millis();
                IpcResponse::success(
                    message,
                    Some(ResponseData::from_timer_state(self.engine.get_state(), now)),
                )
            }
            Err(e) => IpcResponse::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;
    use tokio::time::timeout;

    use super::*;
    use crate::clock::ManualClock;
    use crate::cycle::SessionKind;
    use crate::daemon::alarm::{MockAlarmScheduler, COMPLETION_ALARM};
    use crate::daemon::notifier::MockNotifier;
    use crate::store::MemoryStore;

    const T0: u64 = 1_700_000_000_000;

    struct Running {
        handle: ServiceHandle,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        alarm_tx: mpsc::UnboundedSender<String>,
        events: broadcast::Receiver<ServiceEvent>,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_service(sync_interval: Duration) -> Running {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::new());
        let (events_tx, events) = broadcast::channel(64);
        let engine = TimerEngine::new(
            clock.clone(),
            store.clone(),
            Arc::new(MockAlarmScheduler::new()),
            Arc::new(MockNotifier::new()),
            events_tx,
        );
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (service, handle) = TimerService::new(engine, alarm_rx, sync_interval);
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(service.run(async move {
            let _ = stop_rx.await;
        }));
        Running {
            handle,
            clock,
            store,
            alarm_tx,
            events,
            stop,
            task,
        }
    }

    mod dispatch_tests {
        use super::*;

        #[tokio::test]
        async fn test_start_replies_with_state() {
            let service = spawn_service(Duration::from_secs(30));
            let response = service.handle.request(IpcRequest::StartTimer).await.unwrap();

            assert_eq!(response.status, "success");
            let data = response.data.unwrap();
            assert!(data.state.is_running);
            assert_eq!(data.state.end_time, Some(T0 + 1_500_000));
            assert_eq!(data.remaining_seconds, 1500);
        }

        #[tokio::test]
        async fn test_noop_is_not_an_error() {
            let service = spawn_service(Duration::from_secs(30));
            let response = service.handle.request(IpcRequest::PauseTimer).await.unwrap();
            assert!(!response.is_error());
            assert_eq!(response.message, "タイマーは実行されていません");
        }

        #[tokio::test]
        async fn test_invalid_input_is_an_error() {
            let service = spawn_service(Duration::from_secs(30));
            let response = service
                .handle
                .request(IpcRequest::JumpToPosition { position: 9 })
                .await
                .unwrap();
            assert!(response.is_error());
            assert!(response.data.is_none());

            let response = service
                .handle
                .request(IpcRequest::SetTime { time_left: 0 })
                .await
                .unwrap();
            assert!(response.is_error());
        }

        #[tokio::test]
        async fn test_subscribe_is_rejected_by_dispatch() {
            let service = spawn_service(Duration::from_secs(30));
            let response = service.handle.request(IpcRequest::Subscribe).await.unwrap();
            assert!(response.is_error());
        }

        #[tokio::test]
        async fn test_remaining_seconds_computed_at_reply_time() {
            let service = spawn_service(Duration::from_secs(30));
            service.handle.request(IpcRequest::StartTimer).await.unwrap();
            service.clock.advance_secs(100);

            let response = service.handle.request(IpcRequest::GetState).await.unwrap();
            assert_eq!(response.data.unwrap().remaining_seconds, 1400);
        }
    }

    mod loop_tests {
        use super::*;

        #[tokio::test]
        async fn test_alarm_delivery_completes_session() {
            let service = spawn_service(Duration::from_secs(30));
            service.handle.request(IpcRequest::StartTimer).await.unwrap();
            service.clock.advance_secs(1500);
            service.alarm_tx.send(COMPLETION_ALARM.to_string()).unwrap();

            let mut position = 0;
            for _ in 0..50 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                position = service.store.peek().map_or(0, |s| s.cycle_position);
                if position == 2 {
                    break;
                }
            }
            assert_eq!(position, 2);
            let persisted = service.store.peek().unwrap();
            assert_eq!(persisted.session_type, SessionKind::ShortBreak);
            assert_eq!(persisted.time_left, 300);
        }

        #[tokio::test]
        async fn test_store_changes_are_forwarded() {
            let mut service = spawn_service(Duration::from_secs(30));
            service.handle.request(IpcRequest::StartTimer).await.unwrap();

            let found = timeout(Duration::from_secs(1), async {
                loop {
                    match service.events.recv().await {
                        Ok(ServiceEvent::StateChanged { new_value, .. }) if new_value.is_running => {
                            return true;
                        }
                        Ok(_) => {}
                        Err(_) => return false,
                    }
                }
            })
            .await
            .unwrap();
            assert!(found);
        }

        #[tokio::test]
        async fn test_periodic_sync_is_broadcast() {
            let mut service = spawn_service(Duration::from_millis(50));
            service.handle.request(IpcRequest::StartTimer).await.unwrap();
            service.clock.advance_secs(30);

            let snapshot = timeout(Duration::from_secs(1), async {
                loop {
                    if let Ok(ServiceEvent::StateSync(snapshot)) = service.events.recv().await {
                        if snapshot.time_left == 1470 {
                            return snapshot;
                        }
                    }
                }
            })
            .await
            .unwrap();
            assert!(snapshot.is_running);
        }

        #[tokio::test]
        async fn test_shutdown_stops_loop() {
            let service = spawn_service(Duration::from_secs(30));
            service.stop.send(()).unwrap();
            timeout(Duration::from_secs(1), service.task)
                .await
                .unwrap()
                .unwrap();

            assert!(service.handle.request(IpcRequest::GetState).await.is_err());
        }
    }
}
