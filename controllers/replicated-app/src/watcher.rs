//! ReplicatedApp watcher.
//!
//! Feeds the work queue from the store's watch stream:
//! - subscribes first, then relists, so nothing created in between is lost
//! - `Modified` events that keep the spec generation (status-only writes,
//!   including our own) are dropped
//! - a periodic full relist covers missed events; identities that vanished
//!   without a tombstone are enqueued so their workloads get cleaned up
//! - a lagged or broken stream triggers an immediate relist

use crate::error::{ControllerError, StoreError};
use crate::queue::WorkQueue;
use crate::store::{ApiStore, ChangeKind, WatchEvent, WatchStream};
use crds::{ReconcileObject, ResourceIdentity};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const RELIST_RETRY: Duration = Duration::from_secs(2);

/// Resolves once shutdown is signalled or the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub struct ResourceWatcher {
    store: Arc<dyn ApiStore>,
    queue: Arc<WorkQueue>,
    resync_interval: Duration,
    ready: Arc<AtomicBool>,
    /// Last spec generation seen per identity
    generations: BTreeMap<ResourceIdentity, Option<i64>>,
}

impl std::fmt::Debug for ResourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceWatcher")
            .field("store", &self.store.describe())
            .field("resync_interval", &self.resync_interval)
            .field("known", &self.generations.len())
            .finish()
    }
}

impl ResourceWatcher {
    pub fn new(
        store: Arc<dyn ApiStore>,
        queue: Arc<WorkQueue>,
        resync_interval: Duration,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            queue,
            resync_interval,
            ready,
            generations: BTreeMap::new(),
        }
    }

    /// Watch until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        info!("Starting ReplicatedApp watcher on {}", self.store.describe());

        let mut events = self.store.watch().await?;

        // Initial relist; retried until it succeeds so readiness means
        // every existing object has been enqueued once
        loop {
            match self.relist().await {
                Ok(count) => {
                    info!("Initial relist enqueued {} ReplicatedApp(s)", count);
                    break;
                }
                Err(e) => {
                    error!("Initial relist failed, retrying in {:?}: {}", RELIST_RETRY, e);
                    tokio::select! {
                        () = shutdown_requested(&mut shutdown) => return Ok(()),
                        () = tokio::time::sleep(RELIST_RETRY) => {}
                    }
                }
            }
        }
        self.ready.store(true, Ordering::SeqCst);

        let mut resync = tokio::time::interval(self.resync_interval);
        resync.tick().await;

        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown) => {
                    info!("ReplicatedApp watcher stopping");
                    return Ok(());
                }
                _ = resync.tick() => {
                    debug!("Periodic resync");
                    self.relist_logged().await;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        warn!("Watch stream error, relisting: {}", e);
                        self.relist_logged().await;
                    }
                    None => {
                        warn!("Watch stream ended, resubscribing");
                        events = self.resubscribe().await?;
                        self.relist_logged().await;
                    }
                },
            }
        }
    }

    async fn resubscribe(&self) -> Result<WatchStream, ControllerError> {
        self.store
            .watch()
            .await
            .map_err(|e| ControllerError::Watch(format!("cannot resubscribe: {}", e)))
    }

    fn handle_event(&mut self, event: WatchEvent) {
        let WatchEvent { identity, kind, generation, .. } = event;
        match kind {
            ChangeKind::Added => {
                self.generations.insert(identity.clone(), generation);
                self.queue.enqueue(identity);
            }
            ChangeKind::Modified => {
                if self.generations.get(&identity) == Some(&generation) {
                    debug!("Ignoring status-only update of {}", identity);
                    return;
                }
                debug!("Spec of {} changed (generation {:?})", identity, generation);
                self.generations.insert(identity.clone(), generation);
                self.queue.enqueue(identity);
            }
            ChangeKind::Deleted => {
                self.generations.remove(&identity);
                self.queue.enqueue(identity);
            }
        }
    }

    async fn relist_logged(&mut self) {
        match self.relist().await {
            Ok(count) => debug!("Relist enqueued {} identities", count),
            Err(e) => warn!("Relist failed, keeping watch-only state: {}", e),
        }
    }

    /// Enqueue every listed object plus every known identity that is gone.
    async fn relist(&mut self) -> Result<usize, StoreError> {
        let list = self.store.list().await?;
        let mut seen = BTreeMap::new();
        for app in &list {
            match app.identity() {
                Ok(identity) => {
                    seen.insert(identity, app.generation());
                }
                Err(e) => warn!("Skipping listed object without identity: {}", e),
            }
        }

        let vanished: Vec<ResourceIdentity> = self
            .generations
            .keys()
            .filter(|id| !seen.contains_key(*id))
            .cloned()
            .collect();
        for identity in &vanished {
            info!("{} disappeared without a delete event", identity);
        }

        let count = seen.len() + vanished.len();
        for identity in seen.keys().chain(vanished.iter()) {
            self.queue.enqueue(identity.clone());
        }
        self.generations = seen;
        Ok(count)
    }
}
