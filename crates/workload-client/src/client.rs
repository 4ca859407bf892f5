//! Workload driver HTTP client
//!
//! Workloads live under `/api/v1/namespaces/{namespace}/workloads/{name}`:
//! - `PUT` applies `{ image, replicas }` (idempotent)
//! - `GET` returns the applied state and availability, `404` if unknown
//! - `DELETE` removes the workload, `404` is treated as success

use crate::driver_trait::WorkloadDriverTrait;
use crate::error::WorkloadError;
use crate::models::{EnsureReplicasRequest, WorkloadState};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Workload driver HTTP client
pub struct WorkloadClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl WorkloadClient {
    /// Create a new workload driver client
    ///
    /// # Arguments
    /// * `base_url` - Driver base URL (e.g., "http://workload-driver:8080")
    /// * `token` - Optional bearer token
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, WorkloadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn workload_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/workloads/{}",
            self.base_url,
            urlencoding::encode(namespace),
            urlencoding::encode(name)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Turn a non-success response into a `WorkloadError`
    async fn error_from_response(response: Response, context: &str) -> WorkloadError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                WorkloadError::InvalidRequest(format!("{}: {}", context, body))
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                WorkloadError::Unavailable(format!("{}: {}", context, body))
            }
            _ => WorkloadError::Api {
                status: status.as_u16(),
                message: format!("{}: {}", context, body),
            },
        }
    }
}

#[async_trait::async_trait]
impl WorkloadDriverTrait for WorkloadClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<(), WorkloadError> {
        let url = format!("{}/healthz", self.base_url);
        debug!("Validating workload driver connectivity");

        let response = self.authorize(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "health check failed").await);
        }
        Ok(())
    }

    async fn ensure_replicas(&self, namespace: &str, name: &str, image: &str, count: u32) -> Result<(), WorkloadError> {
        let url = self.workload_url(namespace, name);
        debug!("Ensuring {} replicas of {} for workload {}/{}", count, image, namespace, name);

        let body = EnsureReplicasRequest {
            image: image.to_string(),
            replicas: count,
        };
        let response = self
            .authorize(self.client.put(&url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let context = format!("failed to ensure replicas for {}/{}", namespace, name);
            return Err(Self::error_from_response(response, &context).await);
        }
        Ok(())
    }

    async fn current_available(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError> {
        Ok(self
            .current_state(namespace, name)
            .await?
            .map_or(0, |state| state.available_replicas))
    }

    async fn current_state(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>, WorkloadError> {
        let url = self.workload_url(namespace, name);
        debug!("Fetching workload {}/{}", namespace, name);

        let response = self.authorize(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let context = format!("failed to get workload {}/{}", namespace, name);
            return Err(Self::error_from_response(response, &context).await);
        }

        let text = response.text().await?;
        let state: WorkloadState = serde_json::from_str(&text)?;
        Ok(Some(state))
    }

    async fn remove(&self, namespace: &str, name: &str) -> Result<(), WorkloadError> {
        let url = self.workload_url(namespace, name);
        debug!("Removing workload {}/{}", namespace, name);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        let context = format!("failed to remove workload {}/{}", namespace, name);
        Err(Self::error_from_response(response, &context).await)
    }
}
