//! Controller-specific error types.
//!
//! - `StoreError`: failures of the API store (get/list/watch/write_status)
//! - `ReconcileError`: failures of a single reconcile pass, with `classify()`
//!   mapping them onto the retry policy
//! - `ControllerError`: startup and run-loop failures of the binary

use crds::{CrdError, ResourceIdentity};
use kube::Error as KubeError;
use thiserror::Error;
use workload_client::WorkloadError;

/// Errors returned by an `ApiStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Resource does not exist (deleted, or never created)
    #[error("{0} not found")]
    NotFound(ResourceIdentity),

    /// Optimistic concurrency check failed; nothing was written
    #[error("version conflict on {identity}: expected {expected}, found {actual}")]
    Conflict {
        identity: ResourceIdentity,
        expected: String,
        actual: String,
    },

    /// Create of an identity that is already present
    #[error("{0} already exists")]
    AlreadyExists(ResourceIdentity),

    /// Object cannot be stored (missing name, ...)
    #[error("invalid object: {0}")]
    InvalidObject(#[from] CrdError),

    /// Watch subscriber fell behind and missed events
    #[error("watch lagged, {0} events missed")]
    WatchLagged(u64),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Kubernetes watch error
    #[error("Kubernetes watch error: {0}")]
    KubeWatch(#[from] kube_runtime::watcher::Error),

    /// Status could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Seed manifest could not be decoded
    #[error("Seed decode error: {0}")]
    Decode(#[from] serde_yaml::Error),
}

/// How a failed pass is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout or conflict: retry with backoff
    Transient,
    /// Spec cannot be acted upon: report and park until the spec changes
    Permanent,
    /// Resource disappeared mid-pass: clean up and stop
    NotFound,
}

/// Errors that can occur in a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// API store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workload driver error
    #[error("workload driver error: {0}")]
    Workload(#[from] WorkloadError),

    /// Spec or object failed validation
    #[error("invalid object: {0}")]
    Invalid(#[from] CrdError),
}

impl ReconcileError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            ReconcileError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            ReconcileError::Store(StoreError::InvalidObject(_)) => ErrorClass::Permanent,
            ReconcileError::Store(_) => ErrorClass::Transient,
            ReconcileError::Workload(e) if e.is_transient() => ErrorClass::Transient,
            ReconcileError::Workload(_) => ErrorClass::Permanent,
            ReconcileError::Invalid(_) => ErrorClass::Permanent,
        }
    }

    /// True for optimistic-concurrency conflicts on status writes.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict { .. }))
    }
}

/// Errors that can occur in the ReplicatedApp Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Workload driver error
    #[error("Workload driver error: {0}")]
    Workload(#[from] WorkloadError),

    /// API store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server or seed file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
