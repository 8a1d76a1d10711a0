//! Run history records.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Statistics for a run that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    pub captured_at_ms: i64,
    pub avg_speed_kmh: f64,
    pub distance_meters: i32,
    pub duration_ms: i64,
    pub calories_burned: i32,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
}

/// A stored run. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: i64,
    pub captured_at_ms: i64,
    pub avg_speed_kmh: f64,
    pub distance_meters: i32,
    pub duration_ms: i64,
    pub calories_burned: i32,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
}

impl RunRecord {
    pub fn from_new(id: i64, run: NewRun) -> Self {
        Self {
            id,
            captured_at_ms: run.captured_at_ms,
            avg_speed_kmh: run.avg_speed_kmh,
            distance_meters: run.distance_meters,
            duration_ms: run.duration_ms,
            calories_burned: run.calories_burned,
            thumbnail: run.thumbnail,
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_meters as f64 / 1000.0
    }
}

/// Aggregates shown on the statistics screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    pub run_count: u64,
    pub total_distance_meters: i64,
    pub total_duration_ms: i64,
    pub total_calories_burned: i64,
    /// Mean of the per-run average speeds; 0 with no runs.
    pub mean_avg_speed_kmh: f64,
}

/// Orderings the run history can be viewed in. Every ordering is descending, with the newer id
/// first on ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Date,
    Distance,
    Duration,
    AvgSpeed,
    Calories,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::Date,
        SortKey::Distance,
        SortKey::Duration,
        SortKey::AvgSpeed,
        SortKey::Calories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Date => "date",
            SortKey::Distance => "distance",
            SortKey::Duration => "duration",
            SortKey::AvgSpeed => "avgSpeed",
            SortKey::Calories => "calories",
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortKey::Date => "captured_at_ms",
            SortKey::Distance => "distance_meters",
            SortKey::Duration => "duration_ms",
            SortKey::AvgSpeed => "avg_speed_kmh",
            SortKey::Calories => "calories_burned",
        }
    }

    /// `Ordering::Less` means `a` is listed before `b`.
    pub fn compare(&self, a: &RunRecord, b: &RunRecord) -> Ordering {
        let primary = match self {
            SortKey::Date => b.captured_at_ms.cmp(&a.captured_at_ms),
            SortKey::Distance => b.distance_meters.cmp(&a.distance_meters),
            SortKey::Duration => b.duration_ms.cmp(&a.duration_ms),
            SortKey::AvgSpeed => b.avg_speed_kmh.total_cmp(&a.avg_speed_kmh),
            SortKey::Calories => b.calories_burned.cmp(&a.calories_burned),
        };
        primary.then_with(|| b.id.cmp(&a.id))
    }

    pub fn is_sorted(&self, runs: &[RunRecord]) -> bool {
        runs.windows(2)
            .all(|pair| self.compare(&pair[0], &pair[1]) != Ordering::Greater)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "date" => Ok(SortKey::Date),
            "distance" => Ok(SortKey::Distance),
            "duration" | "time" => Ok(SortKey::Duration),
            "avgspeed" | "avg-speed" | "speed" => Ok(SortKey::AvgSpeed),
            "calories" => Ok(SortKey::Calories),
            other => Err(anyhow::anyhow!("unknown sort key '{other}'")),
        }
    }
}
