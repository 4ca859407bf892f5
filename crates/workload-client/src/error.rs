//! Workload driver errors

use thiserror::Error;

/// Errors that can occur when talking to the workload driver
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// HTTP request/response error (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Driver returned a non-success status
    #[error("Workload driver API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Driver rejected the request as malformed (e.g. unknown image reference)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Driver is temporarily unable to serve the request
    #[error("Workload driver unavailable: {0}")]
    Unavailable(String),
}

impl WorkloadError {
    /// Whether retrying the same request later can succeed.
    ///
    /// Only a rejection of the request itself (400/422) is final. Auth
    /// failures, unknown routes and undecodable responses are problems of the
    /// driver or its configuration and clear up once those are fixed.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkloadError::InvalidRequest(_) => false,
            WorkloadError::Api { status, .. } => !matches!(status, 400 | 422),
            WorkloadError::Http(_) | WorkloadError::Unavailable(_) | WorkloadError::Serialization(_) => true,
        }
    }
}
