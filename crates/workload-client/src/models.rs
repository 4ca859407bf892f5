//! Workload driver API models

use serde::{Deserialize, Serialize};

/// Body of `PUT /api/v1/namespaces/{ns}/workloads/{name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureReplicasRequest {
    pub image: String,
    pub replicas: u32,
}

/// Workload as last applied and observed by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadState {
    /// Image from the last applied request
    pub image: String,

    /// Replica count from the last applied request
    pub replicas: u32,

    /// Replicas currently up and serving
    #[serde(default)]
    pub available_replicas: u32,
}
