//! Integration tests for the workload driver HTTP client
//!
//! A small axum server plays the workload driver so the client can be
//! exercised over real HTTP.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use workload_client::{EnsureReplicasRequest, WorkloadClient, WorkloadDriverTrait, WorkloadError, WorkloadState};

type Workloads = Arc<Mutex<HashMap<(String, String), WorkloadState>>>;

async fn put_workload(
    State(workloads): State<Workloads>,
    Path((ns, name)): Path<(String, String)>,
    Json(body): Json<EnsureReplicasRequest>,
) -> StatusCode {
    if body.image == "invalid" {
        return StatusCode::BAD_REQUEST;
    }
    workloads.lock().unwrap().insert(
        (ns, name),
        WorkloadState {
            image: body.image,
            replicas: body.replicas,
            available_replicas: body.replicas.saturating_sub(1),
        },
    );
    StatusCode::OK
}

async fn get_workload(
    State(workloads): State<Workloads>,
    Path((ns, name)): Path<(String, String)>,
) -> Result<Json<WorkloadState>, StatusCode> {
    workloads
        .lock()
        .unwrap()
        .get(&(ns, name))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn delete_workload(
    State(workloads): State<Workloads>,
    Path((ns, name)): Path<(String, String)>,
) -> StatusCode {
    match workloads.lock().unwrap().remove(&(ns, name)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn start_fake_driver() -> String {
    let workloads: Workloads = Arc::default();
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/api/v1/namespaces/{ns}/workloads/{name}",
            get(get_workload).put(put_workload).delete(delete_workload),
        )
        .with_state(workloads);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_validate_connection() {
    let url = start_fake_driver().await;
    let client = WorkloadClient::new(url, None).unwrap();
    client.validate_connection().await.unwrap();
}

#[tokio::test]
async fn test_ensure_then_read_back() {
    let url = start_fake_driver().await;
    let client = WorkloadClient::new(url, Some("token".to_string())).unwrap();

    assert!(client.current_state("prod", "web").await.unwrap().is_none());
    assert_eq!(client.current_available("prod", "web").await.unwrap(), 0);

    client.ensure_replicas("prod", "web", "app:v1", 3).await.unwrap();

    let state = client.current_state("prod", "web").await.unwrap().unwrap();
    assert_eq!(state.image, "app:v1");
    assert_eq!(state.replicas, 3);
    assert_eq!(client.current_available("prod", "web").await.unwrap(), 2);
}

#[tokio::test]
async fn test_bad_request_is_permanent() {
    let url = start_fake_driver().await;
    let client = WorkloadClient::new(url, None).unwrap();

    let err = client.ensure_replicas("prod", "web", "invalid", 1).await.unwrap_err();
    assert!(matches!(err, WorkloadError::InvalidRequest(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let url = start_fake_driver().await;
    let client = WorkloadClient::new(url, None).unwrap();

    client.ensure_replicas("prod", "web", "app:v1", 1).await.unwrap();
    client.remove("prod", "web").await.unwrap();
    client.remove("prod", "web").await.unwrap();
    assert!(client.current_state("prod", "web").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_driver_is_transient() {
    let client = WorkloadClient::new("http://127.0.0.1:9".to_string(), None).unwrap();
    let err = client.current_available("prod", "web").await.unwrap_err();
    assert!(err.is_transient());
}
