use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::RunStore;

use super::controller::TrackingController;
use super::segment::{AppendOutcome, Fix};

const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Forwards fixes from a location source into a tracking controller.
///
/// The source can start and stop on its own schedule; a closed channel is treated as silence.
/// Nothing the controller does is reported back to the source.
pub struct LocationFeed {
    handle: Option<JoinHandle<u64>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for LocationFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationFeed {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    pub fn attach<S: RunStore>(
        &mut self,
        controller: TrackingController<S>,
        fixes: mpsc::Receiver<Fix>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("location feed already attached");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(forward_fixes(controller, fixes, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Location feed attached");
        Ok(())
    }

    /// Stops forwarding and returns how many fixes were appended to a segment.
    pub async fn detach(&mut self) -> Result<u64> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.wait().await
    }

    /// Waits for the source to close without cancelling, returning the appended count.
    pub async fn wait(&mut self) -> Result<u64> {
        self.cancel_token = None;
        match self.handle.take() {
            Some(handle) => handle
                .await
                .context("location feed task failed to join"),
            None => Ok(0),
        }
    }
}

async fn forward_fixes<S: RunStore>(
    controller: TrackingController<S>,
    mut fixes: mpsc::Receiver<Fix>,
    cancel_token: CancellationToken,
) -> u64 {
    let mut appended = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_debug!("location feed cancelled");
                break;
            }
            next = fixes.recv() => {
                let Some(fix) = next else {
                    info!("Location source closed after {appended} fixes");
                    break;
                };
                if let AppendOutcome::Appended { .. } = controller.push_fix(fix).await {
                    appended += 1;
                }
            }
        }
    }

    appended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SettingsStore, UserProfile};
    use crate::store::MemoryRunStore;
    use crate::tracking::TrackerConfig;
    use std::sync::Arc;

    fn controller() -> TrackingController<MemoryRunStore> {
        TrackingController::new(
            Arc::new(MemoryRunStore::new()),
            Arc::new(SettingsStore::in_memory(UserProfile::default())),
            TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn forwards_until_source_closes() {
        let tracker = controller();
        tracker.start().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let mut feed = LocationFeed::new();
        feed.attach(tracker.clone(), rx).unwrap();
        assert!(feed.attach(tracker.clone(), mpsc::channel(1).1).is_err());

        for i in 0..4 {
            tx.send(Fix::new(10.0 + i as f64 * 0.001, 10.0, i)).await.unwrap();
        }
        drop(tx);

        assert_eq!(feed.wait().await.unwrap(), 4);
        assert!(!feed.is_attached());
        assert_eq!(tracker.snapshot().await.segments[0].len(), 4);
        tracker.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn detach_stops_a_silent_source() {
        let tracker = controller();
        let (_tx, rx) = mpsc::channel::<Fix>(8);
        let mut feed = LocationFeed::new();
        feed.attach(tracker, rx).unwrap();
        assert_eq!(feed.detach().await.unwrap(), 0);
        assert_eq!(feed.detach().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fixes_while_idle_do_not_stop_the_feed() {
        let tracker = controller();
        let (tx, rx) = mpsc::channel(8);
        let mut feed = LocationFeed::new();
        feed.attach(tracker.clone(), rx).unwrap();

        tx.send(Fix::new(1.0, 1.0, 0)).await.unwrap();
        tx.send(Fix::new(1.0, 1.0, 1)).await.unwrap();
        drop(tx);

        assert_eq!(feed.wait().await.unwrap(), 0);
        assert_eq!(tracker.snapshot().await.dropped_fixes, 2);
    }
}
