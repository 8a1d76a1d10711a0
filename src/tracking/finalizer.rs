use std::sync::Arc;

use chrono::Utc;
use log::{error, info};

use crate::db::models::{NewRun, RunRecord};
use crate::error::{Result, TrackingError};
use crate::store::RunStore;

use super::distance::path_length;
use super::segment::Segment;
use super::state::StoppedSession;

const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub distance_meters: i32,
    pub avg_speed_kmh: f64,
    pub calories_burned: i32,
}

/// Statistics for a finished session. Distance is re-summed from every segment.
pub fn compute_run_stats(segments: &[Segment], duration_ms: i64, weight_kg: f64) -> RunStats {
    let total_m: f64 = segments.iter().map(|s| path_length(s.fixes())).sum();
    let distance_meters = total_m.floor().min(i32::MAX as f64) as i32;
    let distance_km = distance_meters as f64 / 1000.0;

    let avg_speed_kmh = if duration_ms > 0 {
        let hours = duration_ms as f64 / MS_PER_HOUR;
        round_to_tenth(distance_km / hours)
    } else {
        0.0
    };

    let calories_burned = (distance_km * weight_kg.max(0.0))
        .floor()
        .min(i32::MAX as f64) as i32;

    RunStats {
        distance_meters,
        avg_speed_kmh,
        calories_burned,
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Turns stopped sessions into stored run records.
pub struct RunFinalizer<S> {
    store: Arc<S>,
}

impl<S> Clone for RunFinalizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RunStore> RunFinalizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Computes the record and inserts it. On a store failure the session stays unfinalized so
    /// the caller can retry.
    pub async fn finalize(
        &self,
        session: &mut StoppedSession,
        weight_kg: f64,
        thumbnail: Vec<u8>,
    ) -> Result<RunRecord> {
        if session.is_finalized() {
            return Err(TrackingError::AlreadyFinalized);
        }

        let stats = compute_run_stats(session.segments(), session.duration_ms(), weight_kg);
        let run = NewRun {
            captured_at_ms: Utc::now().timestamp_millis(),
            avg_speed_kmh: stats.avg_speed_kmh,
            distance_meters: stats.distance_meters,
            duration_ms: session.duration_ms(),
            calories_burned: stats.calories_burned,
            thumbnail,
        };

        let record = self.store.insert(run).await.map_err(|err| {
            error!(
                "Failed to store run for session {}: {err:#}",
                session.session_id()
            );
            TrackingError::persistence(err)
        })?;

        session.mark_finalized();
        info!(
            "Finalized session {} as run {}: {} m, {} km/h, {} kcal",
            session.session_id(),
            record.id,
            record.distance_meters,
            record.avg_speed_kmh,
            record.calories_burned
        );
        Ok(record)
    }
}
