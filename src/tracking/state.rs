use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{Result, TrackingError, Transition};

use super::segment::{AppendOutcome, Fix, Segment, SegmentRecorder, SegmentUpdate};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackingStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Idle => "idle",
            TrackingStatus::Running => "running",
            TrackingStatus::Paused => "paused",
            TrackingStatus::Stopped => "stopped",
        }
    }
}

/// Read-only view of the session handed to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub status: TrackingStatus,
    pub session_id: Option<String>,
    pub started_at_ms: Option<i64>,
    pub elapsed_ms: u64,
    pub live_distance_m: f64,
    pub segments: Vec<Segment>,
    pub dropped_fixes: u64,
}

/// A session frozen by `stop`, waiting to be finalized into a run record.
#[derive(Debug, Clone)]
pub struct StoppedSession {
    session_id: String,
    started_at_ms: i64,
    duration_ms: i64,
    segments: Vec<Segment>,
    finalized: bool,
}

impl StoppedSession {
    pub fn new(
        session_id: String,
        started_at_ms: i64,
        duration_ms: i64,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            session_id,
            started_at_ms,
            duration_ms,
            segments,
            finalized: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }
}

/// Lifecycle of one run attempt.
///
/// Every transition takes the current monotonic instant so the same code serves the live
/// controller and offline replays.
#[derive(Debug)]
pub struct TrackingState {
    status: TrackingStatus,
    session_id: Option<String>,
    started_at_ms: Option<i64>,
    elapsed_ms: u64,
    /// Time accumulated in earlier running windows; combines with `running_anchor` while running.
    elapsed_ms_baseline: u64,
    running_anchor: Option<Instant>,
    paused_at: Option<Instant>,
    recorder: SegmentRecorder,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingState {
    pub fn new() -> Self {
        Self::with_recorder(SegmentRecorder::new())
    }

    pub fn with_notifier(updates: broadcast::Sender<SegmentUpdate>) -> Self {
        Self::with_recorder(SegmentRecorder::with_notifier(updates))
    }

    fn with_recorder(recorder: SegmentRecorder) -> Self {
        Self {
            status: TrackingStatus::Idle,
            session_id: None,
            started_at_ms: None,
            elapsed_ms: 0,
            elapsed_ms_baseline: 0,
            running_anchor: None,
            paused_at: None,
            recorder,
        }
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn segments(&self) -> &[Segment] {
        self.recorder.segments()
    }

    pub fn dropped_fixes(&self) -> u64 {
        self.recorder.dropped_fixes()
    }

    pub fn live_distance_m(&self) -> f64 {
        self.recorder.live_distance_m()
    }

    /// Elapsed time as of the last sync or transition.
    pub fn current_elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn paused_at(&self) -> Option<Instant> {
        self.paused_at
    }

    pub fn subscribe_segments(&self) -> broadcast::Receiver<SegmentUpdate> {
        self.recorder.subscribe()
    }

    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        match (self.status, self.running_anchor) {
            (TrackingStatus::Running, Some(anchor)) => self
                .elapsed_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            _ => self.elapsed_ms,
        }
    }

    pub fn sync_elapsed(&mut self, now: Instant) {
        self.elapsed_ms = self.elapsed_ms(now);
    }

    pub fn start(&mut self, session_id: String, started_at_ms: i64, now: Instant) -> Result<()> {
        if self.status != TrackingStatus::Idle {
            return Err(self.reject(Transition::Start));
        }

        self.recorder.clear();
        self.recorder.start_segment()?;
        self.status = TrackingStatus::Running;
        self.session_id = Some(session_id);
        self.started_at_ms = Some(started_at_ms);
        self.elapsed_ms = 0;
        self.elapsed_ms_baseline = 0;
        self.running_anchor = Some(now);
        self.paused_at = None;
        Ok(())
    }

    /// Returns `false` when the session was already paused.
    pub fn pause(&mut self, now: Instant) -> Result<bool> {
        match self.status {
            TrackingStatus::Running => {
                self.freeze_elapsed(now);
                self.recorder.close_segment();
                self.status = TrackingStatus::Paused;
                self.paused_at = Some(now);
                Ok(true)
            }
            TrackingStatus::Paused => Ok(false),
            _ => Err(self.reject(Transition::Pause)),
        }
    }

    pub fn resume(&mut self, now: Instant) -> Result<()> {
        if self.status != TrackingStatus::Paused {
            return Err(self.reject(Transition::Resume));
        }

        self.recorder.start_segment()?;
        self.status = TrackingStatus::Running;
        self.running_anchor = Some(now);
        self.paused_at = None;
        Ok(())
    }

    pub fn stop(&mut self, now: Instant) -> Result<StoppedSession> {
        let (session_id, started_at_ms) = match (self.status, &self.session_id, self.started_at_ms)
        {
            (TrackingStatus::Running | TrackingStatus::Paused, Some(id), Some(started_at)) => {
                (id.clone(), started_at)
            }
            _ => return Err(self.reject(Transition::Stop)),
        };

        if self.status == TrackingStatus::Running {
            self.freeze_elapsed(now);
        }
        self.recorder.close_segment();
        self.status = TrackingStatus::Stopped;
        self.paused_at = None;

        Ok(StoppedSession::new(
            session_id,
            started_at_ms,
            i64::try_from(self.elapsed_ms).unwrap_or(i64::MAX),
            self.recorder.segments().to_vec(),
        ))
    }

    /// Discards a running or paused session without producing a record.
    pub fn cancel(&mut self) -> Result<()> {
        if !matches!(self.status, TrackingStatus::Running | TrackingStatus::Paused) {
            return Err(self.reject(Transition::Cancel));
        }
        self.reset();
        Ok(())
    }

    /// Back to `Idle`, keeping the notifier and the dropped-fix counter.
    pub fn reset(&mut self) {
        self.recorder.clear();
        self.status = TrackingStatus::Idle;
        self.session_id = None;
        self.started_at_ms = None;
        self.elapsed_ms = 0;
        self.elapsed_ms_baseline = 0;
        self.running_anchor = None;
        self.paused_at = None;
    }

    pub fn append_fix(&mut self, fix: Fix) -> AppendOutcome {
        self.recorder.append_fix(fix)
    }

    pub fn snapshot(&self, now: Instant) -> TrackingSnapshot {
        TrackingSnapshot {
            status: self.status,
            session_id: self.session_id.clone(),
            started_at_ms: self.started_at_ms,
            elapsed_ms: self.elapsed_ms(now),
            live_distance_m: self.recorder.live_distance_m(),
            segments: self.recorder.segments().to_vec(),
            dropped_fixes: self.recorder.dropped_fixes(),
        }
    }

    fn freeze_elapsed(&mut self, now: Instant) {
        self.sync_elapsed(now);
        self.elapsed_ms_baseline = self.elapsed_ms;
        self.running_anchor = None;
    }

    fn reject(&self, transition: Transition) -> TrackingError {
        TrackingError::invalid(transition, self.status.as_str())
    }
}
