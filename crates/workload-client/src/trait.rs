//! WorkloadDriver trait for mocking
//!
//! The controller only talks to the driver through this trait, so the HTTP
//! client and the in-memory driver are interchangeable.

use crate::error::WorkloadError;
use crate::models::WorkloadState;

/// Trait for workload driver operations
///
/// All methods are idempotent at the driver: repeating a call with the same
/// arguments has no additional effect. All async methods must be `Send` to
/// work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait WorkloadDriverTrait: Send + Sync {
    /// Get the base URL (or a descriptive pseudo-URL for in-process drivers)
    fn base_url(&self) -> &str;

    /// Check the driver is reachable
    async fn validate_connection(&self) -> Result<(), WorkloadError>;

    /// Request `count` replicas of `image` for the workload.
    ///
    /// Returns once the request is accepted, not once replicas are running.
    async fn ensure_replicas(&self, namespace: &str, name: &str, image: &str, count: u32) -> Result<(), WorkloadError>;

    /// Replicas the driver currently reports as available (0 for unknown workloads)
    async fn current_available(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError>;

    /// Last applied state, `None` if the driver does not know the workload
    async fn current_state(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>, WorkloadError>;

    /// Remove the workload; removing an unknown workload succeeds
    async fn remove(&self, namespace: &str, name: &str) -> Result<(), WorkloadError>;
}
