use anyhow::{bail, Result};
use rusqlite::Row;

use crate::db::models::{NewRun, RunRecord};

pub fn ensure_non_negative(value: i64, field: &str) -> Result<()> {
    if value < 0 {
        bail!("{field} contains negative value {value}");
    }
    Ok(())
}

/// Rejects statistics that cannot come out of the finalizer.
pub fn validate_new_run(run: &NewRun) -> Result<()> {
    ensure_non_negative(run.captured_at_ms, "captured_at_ms")?;
    ensure_non_negative(run.distance_meters.into(), "distance_meters")?;
    ensure_non_negative(run.duration_ms, "duration_ms")?;
    ensure_non_negative(run.calories_burned.into(), "calories_burned")?;
    if !run.avg_speed_kmh.is_finite() || run.avg_speed_kmh < 0.0 {
        bail!("avg_speed_kmh is not a valid speed: {}", run.avg_speed_kmh);
    }
    Ok(())
}

pub fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get("id")?,
        captured_at_ms: row.get("captured_at_ms")?,
        avg_speed_kmh: row.get("avg_speed_kmh")?,
        distance_meters: row.get("distance_meters")?,
        duration_ms: row.get("duration_ms")?,
        calories_burned: row.get("calories_burned")?,
        thumbnail: row.get("thumbnail")?,
    })
}
