//! Status write-back with optimistic concurrency.

use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::store::ApiStore;
use crds::{ReconcileObject, ReplicatedApp, ReplicatedAppStatus, ResourceIdentity};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of publishing a status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Status was stored at the returned resource version
    Written(String),
    /// Stored status already describes the same observation
    Unchanged,
}

#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn ApiStore>,
    metrics: Metrics,
}

impl std::fmt::Debug for StatusWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusWriter")
            .field("store", &self.store.describe())
            .finish()
    }
}

impl StatusWriter {
    pub fn new(store: Arc<dyn ApiStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Store `status` if the object is still at `expected_version`.
    ///
    /// A conflict writes nothing; the caller re-fetches and runs the whole
    /// pass again instead of merging.
    pub async fn write_status(
        &self,
        identity: &ResourceIdentity,
        expected_version: &str,
        status: &ReplicatedAppStatus,
    ) -> Result<String, StoreError> {
        match self.store.write_status(identity, expected_version, status).await {
            Ok(version) => {
                debug!("Wrote status of {}: version {} -> {}", identity, expected_version, version);
                Ok(version)
            }
            Err(e @ StoreError::Conflict { .. }) => {
                warn!("Status write for {} lost the race: {}", identity, e);
                self.metrics.record_conflict();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Write `status` for the snapshot `app` unless nothing changed.
    ///
    /// Timestamps alone never trigger a write.
    pub async fn publish(&self, app: &ReplicatedApp, status: &ReplicatedAppStatus) -> Result<WriteOutcome, StoreError> {
        if app.status.as_ref().is_some_and(|current| current.same_observation(status)) {
            return Ok(WriteOutcome::Unchanged);
        }
        let identity = app.identity()?;
        let expected = app.resource_version().unwrap_or_default();
        self.write_status(&identity, expected, status)
            .await
            .map(WriteOutcome::Written)
    }
}
