use std::sync::Mutex;

use anyhow::{bail, Result};
use tokio::sync::watch;

use crate::db::models::{NewRun, RunRecord, SortKey};

use super::{RunFeeds, RunStore};

#[derive(Debug, Default)]
struct MemoryInner {
    runs: Vec<RunRecord>,
    next_id: i64,
}

/// Run store kept entirely in memory, for hosts without a data directory and for tests.
#[derive(Debug)]
pub struct MemoryRunStore {
    inner: Mutex<MemoryInner>,
    feeds: RunFeeds,
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                runs: Vec::new(),
                next_id: 1,
            }),
            feeds: RunFeeds::new(),
        }
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Publishing under the lock keeps emission order equal to mutation order.
    fn publish_all(&self, runs: &[RunRecord]) {
        for key in SortKey::ALL {
            let mut sorted = runs.to_vec();
            sorted.sort_by(|a, b| key.compare(a, b));
            self.feeds.publish(key, sorted);
        }
    }
}

impl RunStore for MemoryRunStore {
    async fn insert(&self, run: NewRun) -> Result<RunRecord> {
        let mut inner = self.lock();
        let record = RunRecord::from_new(inner.next_id, run);
        inner.next_id += 1;
        inner.runs.push(record.clone());
        self.publish_all(&inner.runs);
        Ok(record)
    }

    async fn delete(&self, run_id: i64) -> Result<()> {
        let mut inner = self.lock();
        let before = inner.runs.len();
        inner.runs.retain(|run| run.id != run_id);
        if inner.runs.len() == before {
            bail!("run {run_id} not found");
        }
        self.publish_all(&inner.runs);
        Ok(())
    }

    fn subscribe(&self, key: SortKey) -> watch::Receiver<Vec<RunRecord>> {
        self.feeds.subscribe(key)
    }
}
