//! Workload Driver Client
//!
//! The ReplicatedApp controller never starts containers itself. It asks a
//! workload driver (a container orchestration API) to converge a named
//! workload to `image` x `replicas`, and asks it how many replicas are
//! actually available.
//!
//! # Example
//!
//! ```no_run
//! use workload_client::{WorkloadClient, WorkloadDriverTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WorkloadClient::new("http://workload-driver:8080".to_string(), None)?;
//!
//! // Idempotent: calling twice with the same arguments is a no-op at the driver
//! client.ensure_replicas("prod", "web", "app:v1", 3).await?;
//!
//! // Availability is reported asynchronously by the driver
//! let available = client.current_available("prod", "web").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Implementations
//!
//! - [`WorkloadClient`]: HTTP/JSON driver client
//! - [`InMemoryWorkloadDriver`]: in-process driver used for local runs and tests,
//!   with scripted failures and call recording

pub mod client;
pub mod error;
pub mod memory;
pub mod models;
#[path = "trait.rs"]
pub mod driver_trait;

pub use client::WorkloadClient;
pub use driver_trait::WorkloadDriverTrait;
pub use error::WorkloadError;
pub use memory::{Availability, EnsureCall, InMemoryWorkloadDriver};
pub use models::*;
