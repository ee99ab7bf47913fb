//! Timer engine for the Pomodoro Timer.
//!
//! This module owns the authoritative timer state:
//! - Start/pause/reset/set-time transitions
//! - Remaining time derived from the absolute `end_time`, never from a
//!   per-tick countdown
//! - Completion handling and the eight-step cycle
//! - Recovery after the daemon was stopped mid-countdown
//!
//! Every transition persists the new state and broadcasts a snapshot.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::clock::{remaining_seconds, Clock};
use crate::cycle;
use crate::store::{StateStore, StoreError};
use crate::types::{
    PersistedState, ServiceEvent, TimerState, MAX_SET_TIME_SECS, MIN_SET_TIME_SECS,
};

use super::alarm::{AlarmScheduler, COMPLETION_ALARM};
use super::notifier::CompletionNotifier;

// ============================================================================
// Outcome
// ============================================================================

/// Whether a command changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition was applied
    Applied,
    /// The command was a no-op in the current state
    Ignored,
}

/// What [`TimerEngine::restore`] found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing persisted yet; defaults were written
    Fresh,
    /// An idle (paused or never started) session was restored
    Idle,
    /// A running countdown was re-armed
    Resumed { remaining: u32 },
    /// The deadline passed while the daemon was gone; the session was completed
    CompletedWhileAway,
    /// The store could not be read; defaults are used but not written
    Unreadable,
}

// ============================================================================
// TimerEngine
// ============================================================================

/// Owner of the authoritative timer state.
pub struct TimerEngine<S: StateStore> {
    state: TimerState,
    clock: Arc<dyn Clock>,
    store: Arc<S>,
    alarms: Arc<dyn AlarmScheduler>,
    notifier: Arc<dyn CompletionNotifier>,
    events: broadcast::Sender<ServiceEvent>,
    /// Set while the in-memory state is a stand-in for an unreadable record
    store_unreadable: bool,
}

impl<S: StateStore> TimerEngine<S> {
    /// Creates an engine holding a fresh work session.
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<S>,
        alarms: Arc<dyn AlarmScheduler>,
        notifier: Arc<dyn CompletionNotifier>,
        events: broadcast::Sender<ServiceEvent>,
    ) -> Self {
        Self {
            state: TimerState::new(clock.now_millis()),
            clock,
            store,
            alarms,
            notifier,
            events,
            store_unreadable: false,
        }
    }

    /// Returns a reference to the current timer state.
    pub fn get_state(&self) -> &TimerState {
        &self.state
    }

    /// Seconds left right now.
    pub fn remaining(&self) -> u32 {
        self.state.remaining_at(self.clock.now_millis())
    }

    /// Returns the clock the engine reads.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the store the engine writes to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the broadcast hub viewers subscribe to.
    pub fn events(&self) -> &broadcast::Sender<ServiceEvent> {
        &self.events
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Starts (or resumes) the countdown from `time_left`.
    pub async fn start(&mut self) -> Outcome {
        if self.state.is_running {
            tracing::debug!("start: 既に実行中のため無視します");
            return Outcome::Ignored;
        }

        let now = self.clock.now_millis();
        if let Some(paused_at) = self.state.paused_at.take() {
            self.state.paused_duration += now.saturating_sub(paused_at) / 1000;
        }

        let end_time = now + u64::from(self.state.time_left) * 1000;
        self.state.is_running = true;
        self.state.start_time = Some(now);
        self.state.end_time = Some(end_time);

        self.alarms.cancel(COMPLETION_ALARM);
        self.alarms.schedule_at(COMPLETION_ALARM, end_time);

        tracing::info!(
            "タイマーを開始しました: {} (位置 {}, 残り {}秒)",
            self.state.session_type,
            self.state.cycle_position,
            self.state.time_left
        );
        self.persist_and_broadcast().await;
        Outcome::Applied
    }

    /// Pauses the countdown, freezing the remaining seconds.
    pub async fn pause(&mut self) -> Outcome {
        if !self.state.is_running {
            tracing::debug!("pause: 実行されていないため無視します");
            return Outcome::Ignored;
        }

        let now = self.clock.now_millis();
        let remaining = match self.state.end_time {
            Some(end_time) => remaining_seconds(end_time, now),
            None => self.state.time_left,
        };

        self.state.is_running = false;
        self.state.paused_at = Some(now);
        self.state.time_left = remaining;
        self.state.end_time = None;
        self.alarms.cancel(COMPLETION_ALARM);

        tracing::info!("タイマーを一時停止しました (残り {}秒)", remaining);
        self.persist_and_broadcast().await;
        Outcome::Applied
    }

    /// Returns to a fresh idle work session at position 1.
    pub async fn reset(&mut self) -> Outcome {
        self.alarms.cancel(COMPLETION_ALARM);
        self.state = TimerState::new(self.clock.now_millis());

        tracing::info!("タイマーをリセットしました");
        self.persist_and_broadcast().await;
        Outcome::Applied
    }

    /// Sets the idle countdown length.
    ///
    /// # Errors
    ///
    /// Returns an error if `seconds` is outside the accepted range.
    pub async fn set_time(&mut self, seconds: u32) -> Result<Outcome> {
        validate_seconds(seconds)?;
        if self.state.is_running {
            tracing::debug!("set_time: 実行中のため無視します");
            return Ok(Outcome::Ignored);
        }

        self.state.time_left = seconds;
        tracing::info!("残り時間を{}秒に設定しました", seconds);
        self.persist_and_broadcast().await;
        Ok(Outcome::Applied)
    }

    /// Resets, then sets the countdown length.
    ///
    /// # Errors
    ///
    /// Returns an error if `seconds` is outside the accepted range; the state
    /// is left untouched in that case.
    pub async fn set_time_and_reset(&mut self, seconds: u32) -> Result<Outcome> {
        validate_seconds(seconds)?;
        self.reset().await;
        self.set_time(seconds).await
    }

    /// Persists and broadcasts the current state without changing it.
    ///
    /// After an unreadable restore the store is read again instead; until a
    /// read succeeds the defaults are only broadcast, never written.
    pub async fn resend_state(&mut self) -> Outcome {
        if self.store_unreadable {
            if self.restore().await == RestoreOutcome::Unreadable {
                self.sync_tick();
            }
            return Outcome::Applied;
        }
        self.persist_and_broadcast().await;
        Outcome::Applied
    }

    /// Moves to `position` and leaves a fresh idle session there.
    ///
    /// A running countdown is stopped and its alarm cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if `position` is not in 1..=8.
    pub async fn jump_to_position(&mut self, position: u8) -> Result<Outcome> {
        if !cycle::is_valid_position(position) {
            anyhow::bail!(
                "周期位置は1-{}の範囲で指定してください",
                cycle::CYCLE_LENGTH
            );
        }

        self.alarms.cancel(COMPLETION_ALARM);
        self.enter_idle_session(position);

        tracing::info!(
            "位置 {} ({}) に移動しました",
            position,
            self.state.session_type
        );
        self.persist_and_broadcast().await;
        Ok(Outcome::Applied)
    }

    // ------------------------------------------------------------------------
    // Alarms and completion
    // ------------------------------------------------------------------------

    /// Handles an alarm delivered by the scheduler.
    ///
    /// Deliveries for other names, for a timer that is no longer running, or
    /// that arrive before the deadline are ignored (the last one re-arms).
    pub async fn handle_alarm(&mut self, name: &str) -> Outcome {
        if name != COMPLETION_ALARM {
            tracing::debug!("不明なアラーム {} を無視します", name);
            return Outcome::Ignored;
        }
        if !self.state.is_running {
            tracing::debug!("停止中に古いアラームが届いたため無視します");
            return Outcome::Ignored;
        }

        let now = self.clock.now_millis();
        match self.state.end_time {
            Some(end_time) if now < end_time => {
                tracing::debug!("アラームが早すぎるため再設定します");
                self.alarms.schedule_at(COMPLETION_ALARM, end_time);
                Outcome::Ignored
            }
            _ => {
                self.on_completion_alarm().await;
                Outcome::Applied
            }
        }
    }

    /// Completes the current session and moves to the next cycle position.
    ///
    /// The notifier is told first; its failure is logged and the transition
    /// still happens.
    pub async fn on_completion_alarm(&mut self) {
        let completed = self.state.session_type;
        let next_position = cycle::advance(self.state.cycle_position);
        let next_kind = cycle::session_kind_for_position(next_position);

        if let Err(e) = self.notifier.open(completed, next_kind) {
            tracing::warn!("完了通知を表示できませんでした: {}", e);
        }

        self.alarms.cancel(COMPLETION_ALARM);
        self.enter_idle_session(next_position);

        tracing::info!(
            "{} が完了しました。次は {} (位置 {})",
            completed,
            next_kind,
            next_position
        );
        self.persist_and_broadcast().await;
    }

    // ------------------------------------------------------------------------
    // Recovery and sync
    // ------------------------------------------------------------------------

    /// Rebuilds state from the store at daemon startup.
    ///
    /// A running countdown is re-armed for its original `end_time`; one whose
    /// deadline already passed is completed immediately.
    pub async fn restore(&mut self) -> RestoreOutcome {
        let persisted = match self.load_with_retry().await {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!("保存された状態を読み込めません。既定値で起動します: {}", e);
                self.store_unreadable = true;
                return RestoreOutcome::Unreadable;
            }
        };
        self.store_unreadable = false;

        let Some(persisted) = persisted else {
            tracing::info!("保存された状態がありません。新しいセッションで起動します");
            self.persist_and_broadcast().await;
            return RestoreOutcome::Fresh;
        };

        let now = self.clock.now_millis();
        self.state = TimerState::from_persisted(&persisted, now);

        if !self.state.is_running {
            self.state.end_time = None;
            tracing::info!("停止中のセッションを復元しました (残り {}秒)", self.state.time_left);
            self.persist_and_broadcast().await;
            return RestoreOutcome::Idle;
        }

        let Some(end_time) = self.state.end_time else {
            tracing::warn!("実行中なのに終了時刻がありません。停止状態として復元します");
            self.state.is_running = false;
            self.persist_and_broadcast().await;
            return RestoreOutcome::Idle;
        };

        let remaining = remaining_seconds(end_time, now);
        if remaining > 0 {
            self.alarms.schedule_at(COMPLETION_ALARM, end_time);
            tracing::info!("実行中のセッションを復元しました (残り {}秒)", remaining);
            self.persist_and_broadcast().await;
            RestoreOutcome::Resumed { remaining }
        } else {
            tracing::info!("停止中に終了時刻を過ぎたため、セッションを完了します");
            self.on_completion_alarm().await;
            RestoreOutcome::CompletedWhileAway
        }
    }

    /// Broadcasts a snapshot without persisting.
    pub fn sync_tick(&self) {
        let snapshot = self.state.sync_snapshot(self.clock.now_millis());
        if self.events.send(ServiceEvent::StateSync(snapshot)).is_err() {
            tracing::trace!("同期を受信するビューアがいません");
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn enter_idle_session(&mut self, position: u8) {
        let kind = cycle::session_kind_for_position(position);
        self.state.cycle_position = position;
        self.state.session_type = kind;
        self.state.time_left = cycle::duration_for_kind(kind);
        self.state.is_running = false;
        self.state.start_time = None;
        self.state.end_time = None;
        self.state.paused_at = None;
        self.state.paused_duration = 0;
    }

    async fn load_with_retry(&self) -> Result<Option<PersistedState>, StoreError> {
        match self.store.load().await {
            Ok(persisted) => Ok(persisted),
            Err(e) => {
                tracing::warn!("状態の読み込みを再試行します: {}", e);
                self.store.load().await
            }
        }
    }

    async fn persist_and_broadcast(&mut self) {
        // A user command replaces whatever the unreadable record held
        self.store_unreadable = false;
        let now = self.clock.now_millis();
        self.state.last_update_time = now;
        let persisted = self.state.to_persisted(now);

        if let Err(e) = self.store.save(&persisted).await {
            tracing::warn!("状態の保存を再試行します: {}", e);
            if let Err(e) = self.store.save(&persisted).await {
                tracing::error!("状態を保存できませんでした: {}", e);
            }
        }

        self.sync_tick();
    }
}

fn validate_seconds(seconds: u32) -> Result<()> {
    if !(MIN_SET_TIME_SECS..=MAX_SET_TIME_SECS).contains(&seconds) {
        anyhow::bail!(
            "時間は{}-{}秒の範囲で指定してください",
            MIN_SET_TIME_SECS,
            MAX_SET_TIME_SECS
        );
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cycle::SessionKind;
    use crate::daemon::alarm::{AlarmCall, MockAlarmScheduler};
    use crate::daemon::notifier::MockNotifier;
    use crate::store::MemoryStore;

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        engine: TimerEngine<MemoryStore>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        alarms: Arc<MockAlarmScheduler>,
        notifier: Arc<MockNotifier>,
        events: broadcast::Receiver<ServiceEvent>,
    }

    fn harness_with_store(store: MemoryStore) -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(store);
        let alarms = Arc::new(MockAlarmScheduler::new());
        let notifier = Arc::new(MockNotifier::new());
        let (events_tx, events) = broadcast::channel(64);
        let engine = TimerEngine::new(
            clock.clone(),
            store.clone(),
            alarms.clone(),
            notifier.clone(),
            events_tx,
        );
        Harness {
            engine,
            clock,
            store,
            alarms,
            notifier,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with_store(MemoryStore::new())
    }

    fn running_record(end_time: u64) -> PersistedState {
        let mut persisted = TimerState::new(T0).to_persisted(T0);
        persisted.is_running = true;
        persisted.start_time = Some(end_time - 1_500_000);
        persisted.end_time = Some(end_time);
        persisted
    }

    // ------------------------------------------------------------------------
    // start / pause
    // ------------------------------------------------------------------------

    mod start_pause_tests {
        use super::*;

        #[tokio::test]
        async fn test_start_sets_deadline_and_alarm() {
            let mut h = harness();
            assert_eq!(h.engine.start().await, Outcome::Applied);

            let state = h.engine.get_state();
            assert!(state.is_running);
            assert_eq!(state.start_time, Some(T0));
            assert_eq!(state.end_time, Some(T0 + 1_500_000));
            assert_eq!(state.paused_at, None);
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), Some(T0 + 1_500_000));
        }

        #[tokio::test]
        async fn test_start_clears_stale_alarm_first() {
            let mut h = harness();
            h.engine.start().await;
            assert_eq!(
                h.alarms.calls(),
                vec![
                    AlarmCall::Cancel {
                        name: COMPLETION_ALARM.to_string()
                    },
                    AlarmCall::Schedule {
                        name: COMPLETION_ALARM.to_string(),
                        at: T0 + 1_500_000
                    },
                ]
            );
        }

        #[tokio::test]
        async fn test_start_when_running_is_noop() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(10);
            let before = h.engine.get_state().clone();
            let writes = h.store.write_count();

            assert_eq!(h.engine.start().await, Outcome::Ignored);
            assert_eq!(h.engine.get_state(), &before);
            assert_eq!(h.store.write_count(), writes);
        }

        #[tokio::test]
        async fn test_pause_when_idle_is_noop() {
            let mut h = harness();
            assert_eq!(h.engine.pause().await, Outcome::Ignored);
            assert_eq!(h.store.write_count(), 0);
        }

        #[tokio::test]
        async fn test_pause_resume_is_exact() {
            let mut h = harness();
            h.engine.set_time(100).await.unwrap();

            h.engine.start().await;
            h.clock.advance_secs(30);
            h.engine.pause().await;
            assert_eq!(h.engine.get_state().time_left, 70);
            assert!(!h.engine.get_state().is_running);

            h.engine.start().await;
            h.clock.advance_secs(10);
            assert_eq!(h.engine.remaining(), 60);
        }

        #[tokio::test]
        async fn test_paused_time_does_not_leak() {
            let mut h = harness();
            h.engine.set_time(100).await.unwrap();
            h.engine.start().await;
            h.clock.advance_secs(30);
            h.engine.pause().await;

            h.clock.advance_secs(600);
            assert_eq!(h.engine.remaining(), 70);

            h.engine.start().await;
            assert_eq!(h.engine.get_state().end_time, Some(h.clock.now_millis() + 70_000));
            assert_eq!(h.engine.get_state().paused_duration, 600);
        }

        #[tokio::test]
        async fn test_pause_rounds_partial_seconds_up() {
            let mut h = harness();
            h.engine.set_time(10).await.unwrap();
            h.engine.start().await;
            h.clock.advance(9_100);
            h.engine.pause().await;
            assert_eq!(h.engine.get_state().time_left, 1);
        }

        #[tokio::test]
        async fn test_pause_cancels_alarm_and_clears_deadline() {
            let mut h = harness();
            h.engine.start().await;
            h.engine.pause().await;

            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), None);
            let state = h.engine.get_state();
            assert_eq!(state.end_time, None);
            assert_eq!(state.paused_at, Some(T0));
        }
    }

    // ------------------------------------------------------------------------
    // reset / set_time / jump
    // ------------------------------------------------------------------------

    mod mutation_tests {
        use super::*;

        #[tokio::test]
        async fn test_reset_returns_to_first_work_session() {
            let mut h = harness();
            h.engine.jump_to_position(6).await.unwrap();
            h.engine.start().await;
            h.clock.advance_secs(5);
            h.engine.reset().await;

            let state = h.engine.get_state();
            assert!(!state.is_running);
            assert_eq!(state.time_left, 1500);
            assert_eq!(state.session_type, SessionKind::Work);
            assert_eq!(state.cycle_position, 1);
            assert_eq!(state.start_time, None);
            assert_eq!(state.end_time, None);
            assert_eq!(state.paused_at, None);
            assert_eq!(state.paused_duration, 0);
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), None);
        }

        #[tokio::test]
        async fn test_set_time_while_running_is_noop() {
            let mut h = harness();
            h.engine.start().await;
            assert_eq!(h.engine.set_time(60).await.unwrap(), Outcome::Ignored);
            assert_eq!(h.engine.get_state().time_left, 1500);
            assert_eq!(h.engine.get_state().end_time, Some(T0 + 1_500_000));
        }

        #[tokio::test]
        async fn test_set_time_rejects_out_of_range() {
            let mut h = harness();
            assert!(h.engine.set_time(0).await.is_err());
            assert!(h.engine.set_time(MAX_SET_TIME_SECS + 1).await.is_err());
            assert_eq!(h.store.write_count(), 0);
        }

        #[tokio::test]
        async fn test_set_time_and_reset_while_running() {
            let mut h = harness();
            h.engine.jump_to_position(3).await.unwrap();
            h.engine.start().await;

            assert_eq!(
                h.engine.set_time_and_reset(300).await.unwrap(),
                Outcome::Applied
            );
            let state = h.engine.get_state();
            assert!(!state.is_running);
            assert_eq!(state.time_left, 300);
            assert_eq!(state.cycle_position, 1);
        }

        #[tokio::test]
        async fn test_set_time_and_reset_invalid_leaves_state() {
            let mut h = harness();
            h.engine.start().await;
            assert!(h.engine.set_time_and_reset(0).await.is_err());
            assert!(h.engine.get_state().is_running);
        }

        #[tokio::test]
        async fn test_jump_while_running_stops_countdown() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(100);

            h.engine.jump_to_position(8).await.unwrap();

            let state = h.engine.get_state();
            assert!(!state.is_running);
            assert_eq!(state.cycle_position, 8);
            assert_eq!(state.session_type, SessionKind::LongBreak);
            assert_eq!(state.time_left, 900);
            assert_eq!(state.end_time, None);
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), None);
        }

        #[tokio::test]
        async fn test_jump_rejects_invalid_position() {
            let mut h = harness();
            assert!(h.engine.jump_to_position(0).await.is_err());
            assert!(h.engine.jump_to_position(9).await.is_err());
            assert_eq!(h.engine.get_state().cycle_position, 1);
        }

        #[tokio::test]
        async fn test_resend_state_persists_without_change() {
            let mut h = harness();
            let before = h.engine.get_state().clone();
            h.engine.resend_state().await;
            assert_eq!(h.store.write_count(), 1);
            assert_eq!(h.engine.get_state().time_left, before.time_left);
            assert_eq!(h.store.peek().unwrap().cycle_position, 1);
        }
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    mod completion_tests {
        use super::*;

        #[tokio::test]
        async fn test_full_work_session_completes_to_short_break() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(1500);

            assert_eq!(h.engine.handle_alarm(COMPLETION_ALARM).await, Outcome::Applied);

            let state = h.engine.get_state();
            assert_eq!(state.time_left, 300);
            assert_eq!(state.session_type, SessionKind::ShortBreak);
            assert_eq!(state.cycle_position, 2);
            assert!(!state.is_running);
            assert_eq!(
                h.notifier.opened(),
                vec![(SessionKind::Work, SessionKind::ShortBreak)]
            );
        }

        #[tokio::test]
        async fn test_completion_at_eight_wraps_to_one() {
            let mut h = harness();
            h.engine.jump_to_position(8).await.unwrap();
            h.engine.on_completion_alarm().await;

            let state = h.engine.get_state();
            assert_eq!(state.cycle_position, 1);
            assert_eq!(state.session_type, SessionKind::Work);
            assert_eq!(state.time_left, 1500);
        }

        #[tokio::test]
        async fn test_notifier_failure_still_advances() {
            let mut h = harness();
            h.notifier.set_should_fail(true);
            h.engine.start().await;
            h.clock.advance_secs(1500);
            h.engine.handle_alarm(COMPLETION_ALARM).await;

            assert_eq!(h.engine.get_state().cycle_position, 2);
            assert_eq!(h.store.peek().unwrap().cycle_position, 2);
        }

        #[tokio::test]
        async fn test_stale_alarm_after_pause_is_ignored() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(1500);
            h.engine.pause().await;

            assert_eq!(h.engine.handle_alarm(COMPLETION_ALARM).await, Outcome::Ignored);
            assert_eq!(h.engine.get_state().cycle_position, 1);
        }

        #[tokio::test]
        async fn test_early_alarm_rearms() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(100);

            assert_eq!(h.engine.handle_alarm(COMPLETION_ALARM).await, Outcome::Ignored);
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), Some(T0 + 1_500_000));
            assert!(h.engine.get_state().is_running);
        }

        #[tokio::test]
        async fn test_unknown_alarm_is_ignored() {
            let mut h = harness();
            h.engine.start().await;
            h.clock.advance_secs(1500);
            assert_eq!(h.engine.handle_alarm("other").await, Outcome::Ignored);
            assert!(h.engine.get_state().is_running);
        }

        #[tokio::test]
        async fn test_completion_broadcasts_snapshot() {
            let mut h = harness();
            h.engine.start().await;
            let _ = h.events.try_recv();
            h.clock.advance_secs(1500);
            h.engine.handle_alarm(COMPLETION_ALARM).await;

            match h.events.try_recv().unwrap() {
                ServiceEvent::StateSync(snapshot) => {
                    assert_eq!(snapshot.cycle_position, 2);
                    assert_eq!(snapshot.time_left, 300);
                    assert!(!snapshot.is_running);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------------

    mod restore_tests {
        use super::*;

        #[tokio::test]
        async fn test_restore_without_record_writes_defaults() {
            let mut h = harness();
            assert_eq!(h.engine.restore().await, RestoreOutcome::Fresh);
            assert_eq!(h.store.peek().unwrap().time_left, 1500);
        }

        #[tokio::test]
        async fn test_restore_before_deadline_rearms_original_end_time() {
            let end_time = T0 + 5_000;
            let mut h = harness_with_store(MemoryStore::with_state(running_record(end_time)));

            assert_eq!(
                h.engine.restore().await,
                RestoreOutcome::Resumed { remaining: 5 }
            );
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), Some(end_time));
            assert_eq!(h.engine.remaining(), 5);
            assert_eq!(h.engine.get_state().end_time, Some(end_time));
        }

        #[tokio::test]
        async fn test_restore_after_deadline_completes_once() {
            let end_time = T0 - 5_000;
            let mut h = harness_with_store(MemoryStore::with_state(running_record(end_time)));

            assert_eq!(h.engine.restore().await, RestoreOutcome::CompletedWhileAway);

            let state = h.engine.get_state();
            assert_eq!(state.cycle_position, 2);
            assert_eq!(state.session_type, SessionKind::ShortBreak);
            assert_eq!(state.time_left, 300);
            assert!(!state.is_running);
            assert_eq!(h.notifier.opened().len(), 1);
        }

        #[tokio::test]
        async fn test_restore_after_ten_hours_matches_one_second() {
            for gap in [1_000, 36_000_000] {
                let end_time = T0 - gap;
                let mut h =
                    harness_with_store(MemoryStore::with_state(running_record(end_time)));
                h.engine.restore().await;
                assert_eq!(h.engine.get_state().cycle_position, 2, "gap {gap}");
            }
        }

        #[tokio::test]
        async fn test_restore_paused_record() {
            let mut record = TimerState::new(T0).to_persisted(T0);
            record.time_left = 42;
            record.paused_at = Some(T0 - 60_000);
            record.cycle_position = 5;
            let mut h = harness_with_store(MemoryStore::with_state(record));

            assert_eq!(h.engine.restore().await, RestoreOutcome::Idle);
            assert_eq!(h.engine.remaining(), 42);
            assert_eq!(h.engine.get_state().cycle_position, 5);
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), None);
        }

        #[tokio::test]
        async fn test_restore_running_without_deadline_becomes_idle() {
            let mut record = TimerState::new(T0).to_persisted(T0);
            record.is_running = true;
            let mut h = harness_with_store(MemoryStore::with_state(record));

            assert_eq!(h.engine.restore().await, RestoreOutcome::Idle);
            assert!(!h.engine.get_state().is_running);
        }

        #[tokio::test]
        async fn test_restore_retries_a_failed_read() {
            let store = MemoryStore::with_state(running_record(T0 + 5_000));
            store.fail_next_reads(1);
            let mut h = harness_with_store(store);

            assert_eq!(
                h.engine.restore().await,
                RestoreOutcome::Resumed { remaining: 5 }
            );
        }

        #[tokio::test]
        async fn test_unreadable_store_is_not_overwritten() {
            let record = running_record(T0 + 5_000);
            let store = MemoryStore::with_state(record.clone());
            store.fail_next_reads(2);
            let mut h = harness_with_store(store);

            assert_eq!(h.engine.restore().await, RestoreOutcome::Unreadable);
            assert_eq!(h.store.peek(), Some(record));
            assert_eq!(h.store.write_count(), 0);
        }

        #[tokio::test]
        async fn test_get_state_after_unreadable_restore_keeps_record() {
            let record = running_record(T0 + 5_000);
            let store = MemoryStore::with_state(record.clone());
            store.fail_next_reads(4);
            let mut h = harness_with_store(store);

            assert_eq!(h.engine.restore().await, RestoreOutcome::Unreadable);
            h.engine.resend_state().await;

            assert_eq!(h.store.peek(), Some(record));
            assert_eq!(h.store.write_count(), 0);
            // Viewers still get the stand-in state
            assert!(matches!(h.events.try_recv(), Ok(ServiceEvent::StateSync(_))));
        }

        #[tokio::test]
        async fn test_get_state_adopts_record_once_readable() {
            let record = running_record(T0 + 5_000);
            let store = MemoryStore::with_state(record);
            store.fail_next_reads(2);
            let mut h = harness_with_store(store);

            assert_eq!(h.engine.restore().await, RestoreOutcome::Unreadable);
            h.engine.resend_state().await;

            let state = h.engine.get_state();
            assert!(state.is_running);
            assert_eq!(state.end_time, Some(T0 + 5_000));
            assert_eq!(h.alarms.scheduled(COMPLETION_ALARM), Some(T0 + 5_000));
            let stored = h.store.peek().unwrap();
            assert!(stored.is_running);
            assert_eq!(stored.end_time, Some(T0 + 5_000));
        }

        #[tokio::test]
        async fn test_command_after_unreadable_restore_persists() {
            let store = MemoryStore::with_state(running_record(T0 + 5_000));
            store.fail_next_reads(2);
            let mut h = harness_with_store(store);

            assert_eq!(h.engine.restore().await, RestoreOutcome::Unreadable);
            h.engine.jump_to_position(3).await.unwrap();
            assert_eq!(h.store.peek().unwrap().cycle_position, 3);

            // Later GET_STATE goes through the normal path
            h.engine.resend_state().await;
            assert_eq!(h.store.write_count(), 2);
        }
    }

    // ------------------------------------------------------------------------
    // Persistence and sync
    // ------------------------------------------------------------------------

    mod persistence_tests {
        use super::*;

        #[tokio::test]
        async fn test_every_transition_persists() {
            let mut h = harness();
            h.engine.start().await;
            assert!(h.store.peek().unwrap().is_running);
            h.engine.pause().await;
            assert!(!h.store.peek().unwrap().is_running);
            h.engine.set_time(60).await.unwrap();
            assert_eq!(h.store.peek().unwrap().time_left, 60);
            h.engine.reset().await;
            assert_eq!(h.store.peek().unwrap().time_left, 1500);
            assert_eq!(h.store.write_count(), 4);
        }

        #[tokio::test]
        async fn test_write_failure_is_retried_once() {
            let mut h = harness();
            h.store.fail_next_writes(1);
            h.engine.start().await;
            assert!(h.store.peek().unwrap().is_running);
        }

        #[tokio::test]
        async fn test_double_write_failure_keeps_memory_state() {
            let mut h = harness();
            h.store.fail_next_writes(2);
            h.engine.start().await;
            assert!(h.engine.get_state().is_running);
            assert_eq!(h.store.peek(), None);
        }

        #[tokio::test]
        async fn test_sync_tick_reports_live_remaining() {
            let mut h = harness();
            h.engine.start().await;
            let _ = h.events.try_recv();
            h.clock.advance(30_500);

            h.engine.sync_tick();
            match h.events.try_recv().unwrap() {
                ServiceEvent::StateSync(snapshot) => {
                    assert_eq!(snapshot.time_left, 1470);
                    assert_eq!(snapshot.end_time, Some(T0 + 1_500_000));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_sync_tick_without_listeners_is_silent() {
            let h = harness();
            drop(h.events);
            h.engine.sync_tick();
        }
    }
}
