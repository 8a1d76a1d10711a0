use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::models::{RunRecord, SortKey};
use crate::store::RunStore;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// A run list tagged with the ordering it was sorted by.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedRuns {
    pub key: SortKey,
    pub runs: Vec<RunRecord>,
}

struct AggregatorState {
    active: SortKey,
    cache: HashMap<SortKey, Vec<RunRecord>>,
    sources: HashMap<SortKey, watch::Receiver<Vec<RunRecord>>>,
}

impl AggregatorState {
    /// Pulls the newest list the store has published for `key` into the cache.
    fn refresh(&mut self, key: SortKey) -> Vec<RunRecord> {
        let latest = match self.sources.get(&key) {
            Some(source) => source.borrow().clone(),
            None => self.cache.get(&key).cloned().unwrap_or_default(),
        };
        self.cache.insert(key, latest.clone());
        latest
    }
}

/// Single run-history view over the store's five ordered streams.
///
/// Every stream is followed all the time and cached per key; only the stream matching the active
/// key reaches subscribers. All publication happens under one lock, so a subscriber never sees a
/// list tagged with one key but sorted by another.
pub struct SortedRunAggregator {
    state: Arc<Mutex<AggregatorState>>,
    output: Arc<watch::Sender<SortedRuns>>,
    handles: Vec<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl SortedRunAggregator {
    /// Subscribes to every ordering of `store`. Must be called inside a Tokio runtime.
    pub fn new<S: RunStore>(store: &S, initial: SortKey) -> Self {
        let mut cache = HashMap::new();
        let mut sources = HashMap::new();
        let mut listeners = Vec::new();

        for key in SortKey::ALL {
            let mut source = store.subscribe(key);
            cache.insert(key, source.borrow_and_update().clone());
            listeners.push((key, source.clone()));
            sources.insert(key, source);
        }

        let initial_runs = cache.get(&initial).cloned().unwrap_or_default();
        let (output, _) = watch::channel(SortedRuns {
            key: initial,
            runs: initial_runs,
        });

        let state = Arc::new(Mutex::new(AggregatorState {
            active: initial,
            cache,
            sources,
        }));
        let output = Arc::new(output);
        let cancel_token = CancellationToken::new();

        let handles = listeners
            .into_iter()
            .map(|(key, source)| {
                tokio::spawn(follow_ordering(
                    key,
                    source,
                    state.clone(),
                    output.clone(),
                    cancel_token.clone(),
                ))
            })
            .collect();

        info!("Run history aggregator started with {initial} ordering");

        Self {
            state,
            output,
            handles,
            cancel_token,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SortedRuns> {
        self.output.subscribe()
    }

    pub fn current(&self) -> SortedRuns {
        self.output.borrow().clone()
    }

    pub fn active_sort_key(&self) -> SortKey {
        lock(&self.state).active
    }

    /// Switches the ordering and republishes the latest list for it without touching storage.
    pub fn select_sort_key(&self, key: SortKey) -> SortedRuns {
        let mut state = lock(&self.state);
        state.active = key;
        let runs = state.refresh(key);
        let published = SortedRuns { key, runs };
        self.output.send_replace(published.clone());
        log_debug!("sort key switched to {key}, {} runs", published.runs.len());
        published
    }

    /// Stops following the store and waits for the listener tasks to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel_token.cancel();
        for handle in std::mem::take(&mut self.handles) {
            handle
                .await
                .context("run history listener failed to join")?;
        }
        Ok(())
    }
}

impl Drop for SortedRunAggregator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn follow_ordering(
    key: SortKey,
    mut source: watch::Receiver<Vec<RunRecord>>,
    state: Arc<Mutex<AggregatorState>>,
    output: Arc<watch::Sender<SortedRuns>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            changed = source.changed() => {
                if changed.is_err() {
                    log_debug!("{key} ordering closed by the store");
                    break;
                }

                // Reading the source under the lock keeps same-key publications in store order.
                let mut guard = lock(&state);
                let runs = guard.refresh(key);
                if guard.active == key {
                    output.send_replace(SortedRuns { key, runs });
                    log_debug!("published {key} ordering");
                } else {
                    log_debug!("cached {key} ordering");
                }
            }
        }
    }
}

fn lock(state: &Mutex<AggregatorState>) -> MutexGuard<'_, AggregatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
