use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::{watch, Mutex};

use crate::db::{
    models::{NewRun, RunRecord, RunTotals, SortKey},
    Database,
};

use super::{RunFeeds, RunStore};

/// SQLite-backed store. Each ordering is a separate `ORDER BY` query, re-run after every
/// successful insert or delete.
pub struct SqliteRunStore {
    db: Database,
    feeds: RunFeeds,
    refresh_lock: Mutex<()>,
}

impl SqliteRunStore {
    /// Wraps `db` and loads the current history into every feed.
    pub async fn open(db: Database) -> Result<Self> {
        let store = Self {
            db,
            feeds: RunFeeds::new(),
            refresh_lock: Mutex::new(()),
        };
        store.refresh().await.context("failed to load run history")?;
        info!("Run store opened at {}", store.db.path().display());
        Ok(store)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn totals(&self) -> Result<RunTotals> {
        self.db.run_totals().await
    }

    /// Re-reads every ordering from the database and republishes it. Hosts can call this after
    /// a logged refresh failure, or after writing to the database behind the store's back.
    pub async fn reload(&self) -> Result<()> {
        self.refresh().await.context("failed to reload run history")
    }

    /// Re-queries every ordering. Serialized so feeds never go back to an older list.
    async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        for key in SortKey::ALL {
            let runs = self.db.list_runs_sorted(key).await?;
            self.feeds.publish(key, runs);
        }
        Ok(())
    }

    // The mutation already committed, so a failed re-read is retried once and then only logged.
    async fn refresh_after_mutation(&self) {
        if let Err(first) = self.refresh().await {
            warn!("Refreshing run feeds failed, retrying: {first:#}");
            if let Err(err) = self.refresh().await {
                error!("Run feeds are stale until the next reload: {err:#}");
            }
        }
    }
}

impl RunStore for SqliteRunStore {
    async fn insert(&self, run: NewRun) -> Result<RunRecord> {
        let record = self.db.insert_run(run).await?;
        info!(
            "Stored run {} ({} m in {} ms)",
            record.id, record.distance_meters, record.duration_ms
        );
        self.refresh_after_mutation().await;
        Ok(record)
    }

    async fn delete(&self, run_id: i64) -> Result<()> {
        self.db.delete_run(run_id).await?;
        info!("Deleted run {run_id}");
        self.refresh_after_mutation().await;
        Ok(())
    }

    fn subscribe(&self, key: SortKey) -> watch::Receiver<Vec<RunRecord>> {
        self.feeds.subscribe(key)
    }
}
