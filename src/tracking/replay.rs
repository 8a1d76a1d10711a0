use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::segment::Fix;
use super::state::{StoppedSession, TrackingState};

/// One entry of a recorded track file. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackEvent {
    #[serde(rename_all = "camelCase")]
    Start { at_ms: i64 },
    #[serde(rename_all = "camelCase")]
    Fix {
        latitude: f64,
        longitude: f64,
        captured_at_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    Pause { at_ms: i64 },
    #[serde(rename_all = "camelCase")]
    Resume { at_ms: i64 },
    #[serde(rename_all = "camelCase")]
    Stop { at_ms: i64 },
}

impl TrackEvent {
    fn at_ms(&self) -> i64 {
        match self {
            TrackEvent::Fix { captured_at_ms, .. } => *captured_at_ms,
            TrackEvent::Start { at_ms }
            | TrackEvent::Pause { at_ms }
            | TrackEvent::Resume { at_ms }
            | TrackEvent::Stop { at_ms } => *at_ms,
        }
    }
}

#[derive(Debug)]
pub struct ReplayOutcome {
    pub session: StoppedSession,
    pub dropped_fixes: u64,
}

pub fn parse_track(contents: &str) -> Result<Vec<TrackEvent>> {
    serde_json::from_str(contents).context("Failed to parse track events")
}

/// Runs a recorded track through a fresh session, mapping event timestamps onto a monotonic
/// clock so elapsed time matches the recording.
pub fn replay_track(events: &[TrackEvent]) -> Result<ReplayOutcome> {
    let Some(TrackEvent::Start { at_ms: started_at_ms }) = events.first() else {
        bail!("track must begin with a start event");
    };
    let started_at_ms = *started_at_ms;

    let base = Instant::now();
    let mut last_at_ms = started_at_ms;
    let mut state = TrackingState::new();
    state.start(Uuid::new_v4().to_string(), started_at_ms, base)?;

    for (index, event) in events.iter().enumerate().skip(1) {
        let at_ms = event.at_ms();
        if at_ms < last_at_ms {
            bail!("event {index} at {at_ms} is earlier than the previous event at {last_at_ms}");
        }
        last_at_ms = at_ms;
        let Some(now) = at_ms
            .checked_sub(started_at_ms)
            .and_then(|offset| u64::try_from(offset).ok())
            .and_then(|offset| base.checked_add(Duration::from_millis(offset)))
        else {
            bail!("event {index} at {at_ms} is out of range for a track starting at {started_at_ms}");
        };

        match event {
            TrackEvent::Start { .. } => bail!("event {index}: track already started"),
            TrackEvent::Fix {
                latitude,
                longitude,
                captured_at_ms,
            } => {
                state.append_fix(Fix::new(*latitude, *longitude, *captured_at_ms));
            }
            TrackEvent::Pause { .. } => {
                state.pause(now)?;
            }
            TrackEvent::Resume { .. } => state.resume(now)?,
            TrackEvent::Stop { .. } => {
                let dropped_fixes = state.dropped_fixes();
                let session = state.stop(now)?;
                if index + 1 != events.len() {
                    bail!("events after stop at index {index}");
                }
                return Ok(ReplayOutcome {
                    session,
                    dropped_fixes,
                });
            }
        }
    }

    bail!("track never stops")
}
