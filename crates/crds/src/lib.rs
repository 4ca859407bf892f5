//! ReplicatedApp CRD Definitions
//!
//! Kubernetes Custom Resource Definition for the ReplicatedApp controller,
//! plus the object model shared by the work queue, store and reconciler:
//! - `replicated_app`: the CRD itself (desired and observed state)
//! - `object`: identity, deep-copy capability and resource lists
//! - `group_version`: the process-wide group/version registration table

pub mod error;
pub mod group_version;
pub mod object;
pub mod replicated_app;

pub use error::CrdError;
pub use group_version::*;
pub use object::*;
pub use replicated_app::*;
