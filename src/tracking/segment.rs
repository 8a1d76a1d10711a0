use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Result, TrackingError, Transition};

use super::distance::distance_between;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// A single GPS sample as delivered by the location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at_ms: i64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, captured_at_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at_ms,
        }
    }

    pub fn same_position(&self, other: &Fix) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

/// Fixes captured while the session was continuously running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    fixes: Vec<Fix>,
}

impl Segment {
    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn last_fix(&self) -> Option<&Fix> {
        self.fixes.last()
    }
}

/// Sent once per appended fix, in append order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentUpdate {
    pub segment_index: usize,
    pub segment_len: usize,
    pub fix: Fix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { segment_index: usize },
    Dropped,
}

/// Buffers fixes into the currently open segment.
///
/// At most one segment is open at a time and it is always the last one. Segments before it are
/// frozen and never touched again.
#[derive(Debug)]
pub struct SegmentRecorder {
    segments: Vec<Segment>,
    open: bool,
    dropped_fixes: u64,
    live_distance_m: f64,
    updates: broadcast::Sender<SegmentUpdate>,
}

impl Default for SegmentRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentRecorder {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self::with_notifier(updates)
    }

    /// Recorder that publishes on an existing channel, so subscribers survive a session reset.
    pub fn with_notifier(updates: broadcast::Sender<SegmentUpdate>) -> Self {
        Self {
            segments: Vec::new(),
            open: false,
            dropped_fixes: 0,
            live_distance_m: 0.0,
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegmentUpdate> {
        self.updates.subscribe()
    }

    pub fn start_segment(&mut self) -> Result<()> {
        if self.open {
            return Err(TrackingError::invalid(
                Transition::StartSegment,
                "segment open",
            ));
        }
        self.segments.push(Segment::default());
        self.open = true;
        Ok(())
    }

    pub fn append_fix(&mut self, fix: Fix) -> AppendOutcome {
        if !self.open {
            self.dropped_fixes += 1;
            log_warn!(
                "dropping fix at {} ({}, {}): no open segment ({} dropped so far)",
                fix.captured_at_ms,
                fix.latitude,
                fix.longitude,
                self.dropped_fixes
            );
            return AppendOutcome::Dropped;
        }

        let segment_index = self.segments.len() - 1;
        let segment = &mut self.segments[segment_index];
        if let Some(previous) = segment.last_fix() {
            self.live_distance_m += distance_between(previous, &fix);
        }
        segment.fixes.push(fix);

        // No receivers is fine; the live view may not be attached.
        let _ = self.updates.send(SegmentUpdate {
            segment_index,
            segment_len: segment.len(),
            fix,
        });

        AppendOutcome::Appended { segment_index }
    }

    /// Freezes the open segment. Returns `false` when nothing was open.
    pub fn close_segment(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn dropped_fixes(&self) -> u64 {
        self.dropped_fixes
    }

    /// Running distance accumulated fix by fix. Display only; the finalizer recomputes from the
    /// segments.
    pub fn live_distance_m(&self) -> f64 {
        self.live_distance_m
    }

    /// Drops every segment and closes the recorder. The dropped-fix counter is kept.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.open = false;
        self.live_distance_m = 0.0;
    }
}
