pub mod db;
pub mod error;
pub mod history;
pub mod settings;
pub mod store;
pub mod tracking;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use db::{models::SortKey, Database};
use history::SortedRunAggregator;
use settings::SettingsStore;
use store::SqliteRunStore;
use tracking::{TrackerConfig, TrackingController};

pub use error::{TrackingError, Transition};

pub const DATA_DIR_ENV: &str = "RUNTRACK_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "runtrack-data";

/// Everything a host needs: the run store, the user's settings and the live tracker.
pub struct AppState {
    pub store: Arc<SqliteRunStore>,
    pub settings: Arc<SettingsStore>,
    pub tracker: TrackingController<SqliteRunStore>,
}

impl AppState {
    pub async fn open(data_dir: &Path, config: TrackerConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let database = Database::new(data_dir.join("runtrack.sqlite3"))?;
        let store = Arc::new(SqliteRunStore::open(database).await?);
        let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
        let tracker = TrackingController::new(store.clone(), settings.clone(), config);

        info!("runtrack ready in {}", data_dir.display());
        Ok(Self {
            store,
            settings,
            tracker,
        })
    }

    /// A history view over the stored runs, starting in `key` order.
    pub fn history(&self, key: SortKey) -> SortedRunAggregator {
        SortedRunAggregator::new(self.store.as_ref(), key)
    }
}

/// Explicit directory, else `RUNTRACK_DATA_DIR`, else `./runtrack-data`.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}
