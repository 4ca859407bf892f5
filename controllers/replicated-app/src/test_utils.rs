//! Test utilities for creating test ReplicatedApps and controller parts

use crate::config::Config;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::store::InMemoryStore;
use crds::{ReplicatedApp, ReplicatedAppSpec, ResourceIdentity};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use std::time::{Duration, Instant};
use workload_client::InMemoryWorkloadDriver;

/// Create a test ReplicatedApp in the `default` namespace
pub fn create_test_app(name: &str, replicas: i32, image: &str) -> ReplicatedApp {
    ReplicatedApp {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: ReplicatedAppSpec::new(replicas, image),
        status: None,
    }
}

pub fn test_id(name: &str) -> ResourceIdentity {
    ResourceIdentity::new("default", name)
}

/// Config with short intervals suited to tests
pub fn test_config() -> Config {
    Config {
        worker_count: 2,
        resync_interval: Duration::from_secs(3600),
        progress_interval: Duration::from_millis(50),
        backoff_min: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        probe_addr: "127.0.0.1:0".parse().unwrap(),
        ..Config::default()
    }
}

pub fn test_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new(crds::registry()).unwrap())
}

/// Reconciler over an in-memory store and driver, plus its metrics
pub fn test_reconciler(store: &Arc<InMemoryStore>, driver: &InMemoryWorkloadDriver) -> (Reconciler, Metrics) {
    let metrics = Metrics::new().unwrap();
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(driver.clone()),
        metrics.clone(),
        &test_config(),
    );
    (reconciler, metrics)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
