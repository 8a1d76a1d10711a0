use anyhow::{anyhow, Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{row_to_run, validate_new_run},
    models::{NewRun, RunRecord, RunTotals, SortKey},
    Database,
};

const RUN_COLUMNS: &str =
    "id, captured_at_ms, avg_speed_kmh, distance_meters, duration_ms, calories_burned, thumbnail";

impl Database {
    pub async fn insert_run(&self, run: NewRun) -> Result<RunRecord> {
        validate_new_run(&run)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO runs (captured_at_ms, avg_speed_kmh, distance_meters, duration_ms, calories_burned, thumbnail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run.captured_at_ms,
                    run.avg_speed_kmh,
                    run.distance_meters,
                    run.duration_ms,
                    run.calories_burned,
                    run.thumbnail,
                ],
            )
            .context("failed to insert run")?;
            let id = conn.last_insert_rowid();
            Ok(RunRecord::from_new(id, run))
        })
        .await
    }

    pub async fn delete_run(&self, run_id: i64) -> Result<()> {
        self.execute(move |conn| {
            let rows_affected = conn
                .execute("DELETE FROM runs WHERE id = ?1", params![run_id])
                .context("failed to delete run")?;
            if rows_affected == 0 {
                return Err(anyhow!("run {run_id} not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>> {
        self.execute(move |conn| {
            let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1");
            let run = conn
                .query_row(&sql, params![run_id], |row| row_to_run(row))
                .optional()?;
            Ok(run)
        })
        .await
    }

    pub async fn list_runs_sorted(&self, key: SortKey) -> Result<Vec<RunRecord>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY {} DESC, id DESC",
                key.column()
            );
            let mut stmt = conn.prepare(&sql)?;
            let runs = stmt
                .query_map([], |row| row_to_run(row))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("failed to list runs by {key}"))?;
            Ok(runs)
        })
        .await
    }

    pub async fn run_totals(&self) -> Result<RunTotals> {
        self.execute(|conn| {
            let totals = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(distance_meters), 0),
                        COALESCE(SUM(duration_ms), 0),
                        COALESCE(SUM(calories_burned), 0),
                        COALESCE(AVG(avg_speed_kmh), 0.0)
                 FROM runs",
                [],
                |row| {
                    Ok(RunTotals {
                        run_count: row.get::<_, i64>(0)?.max(0) as u64,
                        total_distance_meters: row.get(1)?,
                        total_duration_ms: row.get(2)?,
                        total_calories_burned: row.get(3)?,
                        mean_avg_speed_kmh: row.get(4)?,
                    })
                },
            )?;
            Ok(totals)
        })
        .await
    }
}
