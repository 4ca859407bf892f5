//! API store: where ReplicatedApp objects live.
//!
//! The reconciler only sees the `ApiStore` trait. `InMemoryStore` keeps the
//! object graph in process (local runs and tests), `KubeStore` talks to the
//! Kubernetes API server.

mod kube_store;
mod memory;

pub use self::kube_store::KubeStore;
pub use self::memory::InMemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use crds::{ReplicatedApp, ReplicatedAppStatus, ResourceIdentity, ResourceList};
use futures::stream::BoxStream;

/// Kind of change carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification for one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub identity: ResourceIdentity,
    pub kind: ChangeKind,
    /// Spec generation after the change (`None` for tombstones)
    pub generation: Option<i64>,
    pub resource_version: Option<String>,
}

impl WatchEvent {
    pub fn new(identity: ResourceIdentity, kind: ChangeKind, app: Option<&ReplicatedApp>) -> Self {
        Self {
            identity,
            kind,
            generation: app.and_then(|a| a.metadata.generation),
            resource_version: app.and_then(|a| a.metadata.resource_version.clone()),
        }
    }
}

/// Stream of watch events; an `Err` item means events may have been missed
pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

#[async_trait]
pub trait ApiStore: Send + Sync {
    /// Fetches an independent copy of the object, `None` if it does not exist
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ReplicatedApp>, StoreError>;

    /// Lists every object in scope
    async fn list(&self) -> Result<ResourceList<ReplicatedApp>, StoreError>;

    /// Subscribes to change notifications.
    ///
    /// Delivery is at-least-once; consumers tolerate duplicates and relist
    /// when the stream reports an error.
    async fn watch(&self) -> Result<WatchStream, StoreError>;

    /// Replaces the status if the stored version still equals
    /// `expected_version`, returning the new version.
    ///
    /// On mismatch returns `StoreError::Conflict` and writes nothing.
    async fn write_status(
        &self,
        identity: &ResourceIdentity,
        expected_version: &str,
        status: &ReplicatedAppStatus,
    ) -> Result<String, StoreError>;

    /// Short name for logs
    fn describe(&self) -> String;
}
