use std::sync::Arc;

use chrono::Utc;
use log::info;
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::db::models::RunRecord;
use crate::error::{Result, TrackingError, Transition};
use crate::settings::SettingsStore;
use crate::store::RunStore;

use super::{
    config::TrackerConfig,
    finalizer::RunFinalizer,
    segment::{AppendOutcome, Fix, SegmentUpdate},
    state::{StoppedSession, TrackingSnapshot, TrackingState, TrackingStatus},
};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const SEGMENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackingEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        status: TrackingStatus,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        elapsed_ms: u64,
        live_distance_m: f64,
    },
    Finalized { run: RunRecord },
}

struct Session {
    state: TrackingState,
    /// Set by `stop`; kept after a successful finalize so a repeated call is detected.
    stopped: Option<StoppedSession>,
}

/// Single owner of the live tracking session.
///
/// Commands from the presentation layer, fixes from the location source and timer ticks all go
/// through one mutex, so they are applied one at a time in arrival order.
pub struct TrackingController<S> {
    session: Arc<Mutex<Session>>,
    finalizer: RunFinalizer<S>,
    settings: Arc<SettingsStore>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    elapsed_tx: Arc<watch::Sender<u64>>,
    events: broadcast::Sender<TrackingEvent>,
    segment_updates: broadcast::Sender<SegmentUpdate>,
    config: TrackerConfig,
}

impl<S> Clone for TrackingController<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            finalizer: self.finalizer.clone(),
            settings: Arc::clone(&self.settings),
            ticker: Arc::clone(&self.ticker),
            elapsed_tx: Arc::clone(&self.elapsed_tx),
            events: self.events.clone(),
            segment_updates: self.segment_updates.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: RunStore> TrackingController<S> {
    pub fn new(store: Arc<S>, settings: Arc<SettingsStore>, config: TrackerConfig) -> Self {
        let (segment_updates, _) = broadcast::channel(SEGMENT_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (elapsed_tx, _) = watch::channel(0);

        Self {
            session: Arc::new(Mutex::new(Session {
                state: TrackingState::with_notifier(segment_updates.clone()),
                stopped: None,
            })),
            finalizer: RunFinalizer::new(store),
            settings,
            ticker: Arc::new(Mutex::new(None)),
            elapsed_tx: Arc::new(elapsed_tx),
            events,
            segment_updates,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.finalizer.store()
    }

    /// Elapsed running time, refreshed every tick while running and on every transition.
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    /// One message per appended fix, in append order.
    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentUpdate> {
        self.segment_updates.subscribe()
    }

    pub async fn status(&self) -> TrackingStatus {
        self.session.lock().await.state.status()
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        let guard = self.session.lock().await;
        guard.state.snapshot(Instant::now())
    }

    pub async fn start(&self) -> Result<TrackingSnapshot> {
        let session_id = Uuid::new_v4().to_string();
        let started_at_ms = Utc::now().timestamp_millis();

        let snapshot = {
            let mut guard = self.session.lock().await;
            let now = Instant::now();
            guard.state.start(session_id.clone(), started_at_ms, now)?;
            guard.stopped = None;
            self.spawn_ticker().await;
            self.publish_transition(&guard.state, now)
        };

        info!("Tracking session {session_id} started");
        Ok(snapshot)
    }

    /// Pausing an already paused session is accepted and changes nothing.
    pub async fn pause(&self) -> Result<TrackingSnapshot> {
        let (snapshot, changed) = {
            let mut guard = self.session.lock().await;
            let now = Instant::now();
            let changed = guard.state.pause(now)?;
            let snapshot = if changed {
                self.cancel_ticker().await;
                self.publish_transition(&guard.state, now)
            } else {
                guard.state.snapshot(now)
            };
            (snapshot, changed)
        };

        if changed {
            info!("Tracking paused at {} ms", snapshot.elapsed_ms);
        }
        Ok(snapshot)
    }

    pub async fn resume(&self) -> Result<TrackingSnapshot> {
        let snapshot = {
            let mut guard = self.session.lock().await;
            let now = Instant::now();
            guard.state.resume(now)?;
            self.spawn_ticker().await;
            self.publish_transition(&guard.state, now)
        };

        info!(
            "Tracking resumed with segment {}",
            snapshot.segments.len()
        );
        Ok(snapshot)
    }

    pub async fn stop(&self) -> Result<TrackingSnapshot> {
        let snapshot = {
            let mut guard = self.session.lock().await;
            let now = Instant::now();
            let stopped = guard.state.stop(now)?;
            guard.stopped = Some(stopped);
            self.cancel_ticker().await;
            self.publish_transition(&guard.state, now)
        };

        info!(
            "Tracking stopped after {} ms with {} segments",
            snapshot.elapsed_ms,
            snapshot.segments.len()
        );
        Ok(snapshot)
    }

    /// Throws the session away without storing anything.
    pub async fn cancel(&self) -> Result<()> {
        {
            let mut guard = self.session.lock().await;
            guard.state.cancel()?;
            guard.stopped = None;
            self.cancel_ticker().await;
            self.publish_transition(&guard.state, Instant::now());
        }

        info!("Tracking session cancelled");
        Ok(())
    }

    /// Feeds one fix from the location source. Never fails; fixes outside a running segment are
    /// dropped and counted.
    pub async fn push_fix(&self, fix: Fix) -> AppendOutcome {
        self.session.lock().await.state.append_fix(fix)
    }

    /// Stores the stopped session as a run, using the profile weight. The controller returns to
    /// `Idle` on success; on a store failure it stays `Stopped` so the call can be retried.
    pub async fn finalize(&self, thumbnail: Vec<u8>) -> Result<RunRecord> {
        let weight_kg = self.settings.weight_kg();

        // Held across the insert so two finalize calls cannot both reach the store.
        let mut guard = self.session.lock().await;
        let session = &mut *guard;

        let Some(stopped) = session.stopped.as_mut() else {
            return Err(TrackingError::invalid(
                Transition::Finalize,
                session.state.status().as_str(),
            ));
        };

        let record = self.finalizer.finalize(stopped, weight_kg, thumbnail).await?;

        session.state.reset();
        self.publish_transition(&session.state, Instant::now());
        let _ = self.events.send(TrackingEvent::Finalized {
            run: record.clone(),
        });
        Ok(record)
    }

    fn publish_transition(&self, state: &TrackingState, now: Instant) -> TrackingSnapshot {
        let snapshot = state.snapshot(now);
        self.elapsed_tx.send_replace(snapshot.elapsed_ms);
        let _ = self.events.send(TrackingEvent::StateChanged {
            status: snapshot.status,
            elapsed_ms: snapshot.elapsed_ms,
        });
        snapshot
    }

    // Ticker changes happen under the session lock so a pause racing a resume cannot abort the
    // newer ticker.
    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let session = Arc::clone(&self.session);
        let elapsed_tx = Arc::clone(&self.elapsed_tx);
        let events = self.events.clone();
        let tick_interval = self.config.tick_interval;
        let heartbeat_every = self.config.heartbeat_every_ticks.max(1);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;

            loop {
                interval.tick().await;

                let (elapsed_ms, live_distance_m) = {
                    let mut guard = session.lock().await;
                    if guard.state.status() != TrackingStatus::Running {
                        break;
                    }
                    guard.state.sync_elapsed(Instant::now());
                    let elapsed_ms = guard.state.current_elapsed_ms();
                    // Published under the lock so a tick never lands after a later transition.
                    elapsed_tx.send_replace(elapsed_ms);
                    (elapsed_ms, guard.state.live_distance_m())
                };

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    log_debug!("heartbeat: {elapsed_ms} ms, {live_distance_m:.0} m");
                    let _ = events.send(TrackingEvent::Heartbeat {
                        elapsed_ms,
                        live_distance_m,
                    });
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewRun, SortKey};
    use crate::settings::UserProfile;
    use crate::store::MemoryRunStore;
    use anyhow::anyhow;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Roughly 500 m of latitude at 52.5 N.
    const HALF_KM_LAT: f64 = 0.004_494;

    fn controller() -> TrackingController<MemoryRunStore> {
        TrackingController::new(
            Arc::new(MemoryRunStore::new()),
            Arc::new(SettingsStore::in_memory(UserProfile::default())),
            TrackerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_only_accrues_while_running() {
        let tracker = controller();
        tracker.start().await.unwrap();

        time::advance(Duration::from_secs(5)).await;
        let paused = tracker.pause().await.unwrap();
        assert_eq!(paused.elapsed_ms, 5_000);

        time::advance(Duration::from_secs(60)).await;
        assert_eq!(tracker.snapshot().await.elapsed_ms, 5_000);

        let again = tracker.pause().await.unwrap();
        assert_eq!(again.status, TrackingStatus::Paused);
        assert_eq!(again.elapsed_ms, 5_000);

        tracker.resume().await.unwrap();
        time::advance(Duration::from_secs(2)).await;
        assert_eq!(tracker.snapshot().await.elapsed_ms, 7_000);
        assert_eq!(tracker.snapshot().await.segments.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_non_decreasing_elapsed() {
        let tracker = controller();
        let mut elapsed = tracker.elapsed();
        tracker.start().await.unwrap();

        let mut last = 0;
        while last < 3_000 {
            elapsed.changed().await.unwrap();
            let value = *elapsed.borrow_and_update();
            assert!(value >= last, "{value} < {last}");
            last = value;
        }
        assert_eq!(tracker.status().await, TrackingStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn one_kilometer_run_is_stored_with_profile_weight() {
        let tracker = controller();
        let mut events = tracker.subscribe_events();
        tracker.start().await.unwrap();

        for (i, lat) in [52.5, 52.5 + HALF_KM_LAT, 52.5 + 2.0 * HALF_KM_LAT]
            .into_iter()
            .enumerate()
        {
            let outcome = tracker.push_fix(Fix::new(lat, 13.4, i as i64 * 10_000)).await;
            assert_eq!(outcome, AppendOutcome::Appended { segment_index: 0 });
            time::advance(Duration::from_secs(10)).await;
        }

        let stopped = tracker.stop().await.unwrap();
        assert_eq!(stopped.elapsed_ms, 30_000);

        let run = tracker.finalize(vec![1, 2, 3]).await.unwrap();
        assert_eq!(run.distance_meters, 1_000);
        assert_eq!(run.duration_ms, 30_000);
        assert_eq!(run.avg_speed_kmh, 120.0);
        assert_eq!(run.calories_burned, 80);
        assert_eq!(run.thumbnail, vec![1, 2, 3]);
        assert_eq!(tracker.status().await, TrackingStatus::Idle);
        assert_eq!(tracker.store().runs().len(), 1);

        let mut saw_finalized = false;
        while let Ok(event) = events.try_recv() {
            if let TrackingEvent::Finalized { run: stored } = event {
                assert_eq!(stored.id, run.id);
                saw_finalized = true;
            }
        }
        assert!(saw_finalized);
    }

    #[tokio::test(start_paused = true)]
    async fn second_finalize_is_rejected() {
        let tracker = controller();
        tracker.start().await.unwrap();
        tracker.stop().await.unwrap();
        tracker.finalize(Vec::new()).await.unwrap();

        let err = tracker.finalize(Vec::new()).await.unwrap_err();
        assert_eq!(err, TrackingError::AlreadyFinalized);
        assert_eq!(tracker.store().runs().len(), 1);

        // A new session clears the finalized one.
        tracker.start().await.unwrap();
        let err = tracker.finalize(Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::InvalidState {
                transition: Transition::Finalize,
                state: "running"
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_idle_is_invalid() {
        let tracker = controller();
        let err = tracker.stop().await.unwrap_err();
        assert_eq!(
            err,
            TrackingError::InvalidState {
                transition: Transition::Stop,
                state: "idle"
            }
        );
        assert_eq!(tracker.status().await, TrackingStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_without_storing() {
        let tracker = controller();
        tracker.start().await.unwrap();
        tracker.push_fix(Fix::new(1.0, 1.0, 0)).await;
        time::advance(Duration::from_secs(3)).await;

        tracker.cancel().await.unwrap();
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackingStatus::Idle);
        assert!(snapshot.segments.is_empty());
        assert_eq!(*tracker.elapsed().borrow(), 0);
        assert!(tracker.store().runs().is_empty());
        assert!(tracker.finalize(Vec::new()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fix_before_start_is_dropped() {
        let tracker = controller();
        let outcome = tracker.push_fix(Fix::new(1.0, 1.0, 0)).await;
        assert_eq!(outcome, AppendOutcome::Dropped);

        let snapshot = tracker.snapshot().await;
        assert!(snapshot.segments.is_empty());
        assert_eq!(snapshot.dropped_fixes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn segment_updates_follow_segments_across_resume() {
        let tracker = controller();
        let mut updates = tracker.subscribe_segments();
        tracker.start().await.unwrap();
        tracker.push_fix(Fix::new(1.0, 1.0, 0)).await;
        tracker.pause().await.unwrap();
        tracker.push_fix(Fix::new(1.1, 1.0, 1)).await;
        tracker.resume().await.unwrap();
        tracker.push_fix(Fix::new(1.2, 1.0, 2)).await;

        let first = updates.try_recv().unwrap();
        let second = updates.try_recv().unwrap();
        assert_eq!((first.segment_index, first.fix.captured_at_ms), (0, 0));
        assert_eq!((second.segment_index, second.fix.captured_at_ms), (1, 2));
        assert!(updates.try_recv().is_err());
    }

    /// Rejects the first insert, then behaves like a memory store.
    struct FailOnceStore {
        fail: AtomicBool,
        inner: MemoryRunStore,
    }

    impl RunStore for FailOnceStore {
        async fn insert(&self, run: NewRun) -> anyhow::Result<RunRecord> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(anyhow!("disk I/O error"));
            }
            self.inner.insert(run).await
        }

        async fn delete(&self, run_id: i64) -> anyhow::Result<()> {
            self.inner.delete(run_id).await
        }

        fn subscribe(&self, key: SortKey) -> watch::Receiver<Vec<RunRecord>> {
            self.inner.subscribe(key)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_stop_keeps_the_stopped_session() {
        let tracker = controller();
        tracker.start().await.unwrap();
        tracker.push_fix(Fix::new(1.0, 1.0, 0)).await;
        time::advance(Duration::from_secs(4)).await;
        tracker.stop().await.unwrap();

        let err = tracker.cancel().await.unwrap_err();
        assert_eq!(
            err,
            TrackingError::InvalidState {
                transition: Transition::Cancel,
                state: "stopped"
            }
        );
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackingStatus::Stopped);
        assert_eq!(snapshot.segments[0].len(), 1);

        let run = tracker.finalize(Vec::new()).await.unwrap();
        assert_eq!(run.duration_ms, 4_000);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_leaves_session_stopped_for_retry() {
        let store = Arc::new(FailOnceStore {
            fail: AtomicBool::new(true),
            inner: MemoryRunStore::new(),
        });
        let tracker = TrackingController::new(
            store.clone(),
            Arc::new(SettingsStore::in_memory(UserProfile::default())),
            TrackerConfig::default(),
        );

        tracker.start().await.unwrap();
        for (i, lat) in [52.5, 52.5 + HALF_KM_LAT].into_iter().enumerate() {
            tracker.push_fix(Fix::new(lat, 13.4, i as i64)).await;
        }
        time::advance(Duration::from_secs(15)).await;
        tracker.stop().await.unwrap();

        let err = tracker.finalize(vec![7]).await.unwrap_err();
        assert!(matches!(err, TrackingError::Persistence { ref message } if message.contains("disk I/O")));
        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.status, TrackingStatus::Stopped);
        assert_eq!(snapshot.segments.len(), 1);
        assert_eq!(snapshot.segments[0].len(), 2);
        assert_eq!(snapshot.elapsed_ms, 15_000);
        assert!(store.inner.runs().is_empty());

        let run = tracker.finalize(vec![7]).await.unwrap();
        assert_eq!(run.distance_meters, 500);
        assert_eq!(run.duration_ms, 15_000);
        assert_eq!(store.inner.runs().len(), 1);
        assert_eq!(tracker.status().await, TrackingStatus::Idle);

        let err = tracker.finalize(vec![7]).await.unwrap_err();
        assert_eq!(err, TrackingError::AlreadyFinalized);
        assert_eq!(store.inner.runs().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fixes_ticks_and_commands_stay_consistent() {
        let tracker = TrackingController::new(
            Arc::new(MemoryRunStore::new()),
            Arc::new(SettingsStore::in_memory(UserProfile::default())),
            TrackerConfig {
                tick_interval: Duration::from_millis(1),
                heartbeat_every_ticks: 1,
            },
        );
        let done = CancellationToken::new();

        let mut elapsed = tracker.elapsed();
        let elapsed_watcher = {
            let done = done.clone();
            tokio::spawn(async move {
                let mut last = 0;
                let mut seen = 0usize;
                loop {
                    tokio::select! {
                        _ = done.cancelled() => break,
                        changed = elapsed.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let value = *elapsed.borrow_and_update();
                            assert!(value >= last, "elapsed went from {last} to {value}");
                            last = value;
                            seen += 1;
                        }
                    }
                }
                seen
            })
        };

        tracker.start().await.unwrap();

        let pusher = {
            let tracker = tracker.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut outcomes = Vec::new();
                let mut seq: i64 = 0;
                while !done.is_cancelled() {
                    let fix = Fix::new(10.0 + seq as f64 * 1e-5, 10.0, seq);
                    outcomes.push((seq, tracker.push_fix(fix).await));
                    seq += 1;
                    tokio::task::yield_now().await;
                }
                outcomes
            })
        };

        let cycles = 20;
        let mut running_entries = 1;
        for _ in 0..cycles {
            tokio::time::sleep(Duration::from_millis(3)).await;
            let paused = tracker.pause().await.unwrap();
            assert_eq!(paused.segments.len(), running_entries);

            tokio::time::sleep(Duration::from_millis(3)).await;
            let resumed = tracker.resume().await.unwrap();
            running_entries += 1;
            assert_eq!(resumed.segments.len(), running_entries);
            assert!(resumed.elapsed_ms >= paused.elapsed_ms);
        }
        tokio::time::sleep(Duration::from_millis(3)).await;

        done.cancel();
        let outcomes = pusher.await.unwrap();
        let stopped = tracker.stop().await.unwrap();
        assert!(elapsed_watcher.await.unwrap() > 0);

        assert_eq!(stopped.segments.len(), running_entries);

        let mut appended = HashSet::new();
        let mut dropped = HashSet::new();
        for (seq, outcome) in &outcomes {
            match outcome {
                AppendOutcome::Appended { segment_index } => {
                    let segment = &stopped.segments[*segment_index];
                    assert!(segment.fixes().iter().any(|fix| fix.captured_at_ms == *seq));
                    appended.insert(*seq);
                }
                AppendOutcome::Dropped => {
                    dropped.insert(*seq);
                }
            }
        }

        let mut recorded = 0;
        for segment in &stopped.segments {
            let stamps: Vec<i64> = segment.fixes().iter().map(|fix| fix.captured_at_ms).collect();
            assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
            for stamp in &stamps {
                assert!(!dropped.contains(stamp), "fix {stamp} recorded while paused");
                assert!(appended.contains(stamp));
            }
            recorded += stamps.len();
        }
        assert_eq!(recorded, appended.len());
        assert_eq!(stopped.dropped_fixes, dropped.len() as u64);
    }
}
