//! Persistent run storage as seen by the tracking core.
//!
//! A store accepts inserts and deletes and keeps one observable list per [`SortKey`]. Every
//! successful mutation re-publishes all orderings.

use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;
use tokio::sync::watch;

use crate::db::models::{NewRun, RunRecord, SortKey};
use crate::error::TrackingError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRunStore;
pub use sqlite::SqliteRunStore;

pub trait RunStore: Send + Sync + 'static {
    /// Stores the run and returns it with its assigned id.
    fn insert(&self, run: NewRun) -> impl Future<Output = Result<RunRecord>> + Send;

    fn delete(&self, run_id: i64) -> impl Future<Output = Result<()>> + Send;

    /// Live list of every stored run in `key` order.
    ///
    /// Lists are republished after each successful mutation. If re-reading fails after a change
    /// has committed, the lists can lag behind storage until the next successful refresh.
    fn subscribe(&self, key: SortKey) -> watch::Receiver<Vec<RunRecord>>;
}

/// Explicit user deletion of a stored run.
pub async fn delete_run<S: RunStore>(store: &S, run: &RunRecord) -> Result<(), TrackingError> {
    store
        .delete(run.id)
        .await
        .map_err(TrackingError::persistence)
}

/// One watch channel per ordering.
#[derive(Debug)]
pub(crate) struct RunFeeds {
    senders: HashMap<SortKey, watch::Sender<Vec<RunRecord>>>,
}

impl RunFeeds {
    pub(crate) fn new() -> Self {
        let senders = SortKey::ALL
            .into_iter()
            .map(|key| (key, watch::channel(Vec::new()).0))
            .collect();
        Self { senders }
    }

    pub(crate) fn subscribe(&self, key: SortKey) -> watch::Receiver<Vec<RunRecord>> {
        self.sender(key).subscribe()
    }

    pub(crate) fn publish(&self, key: SortKey, runs: Vec<RunRecord>) {
        self.sender(key).send_replace(runs);
    }

    fn sender(&self, key: SortKey) -> &watch::Sender<Vec<RunRecord>> {
        // Populated for every key in `new`.
        &self.senders[&key]
    }
}
