//! End-to-end tests: store → watcher → queue → workers → reconciler → store

use super::*;
use crate::test_utils::{create_test_app, test_config, test_id, test_store, wait_for};
use crds::{AppPhase, ReplicatedApp, ReplicatedAppSpec, REASON_INVALID_SPEC, CONDITION_READY};
use std::time::Duration;
use workload_client::EnsureCall;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<InMemoryStore>,
    driver: InMemoryWorkloadDriver,
    running: RunningController,
}

async fn start(driver: InMemoryWorkloadDriver) -> Harness {
    let store = test_store();
    let controller = Controller::from_parts(test_config(), store.clone(), Arc::new(driver.clone())).unwrap();
    let running = controller.start().await.unwrap();
    assert!(wait_for(TIMEOUT, || running.is_ready()).await, "initial relist did not finish");
    Harness { store, driver, running }
}

fn snapshot(store: &InMemoryStore, name: &str) -> Option<ReplicatedApp> {
    store.snapshot(&test_id(name))
}

fn status_matches(store: &InMemoryStore, name: &str, check: impl Fn(&crds::ReplicatedAppStatus) -> bool) -> bool {
    snapshot(store, name)
        .and_then(|app| app.status)
        .is_some_and(|status| check(&status))
}

fn call(replicas: u32) -> EnsureCall {
    EnsureCall {
        namespace: "default".to_string(),
        name: "web".to_string(),
        image: "app:v1".to_string(),
        replicas,
    }
}

#[tokio::test]
async fn test_new_app_is_scaled_and_reported() {
    let h = start(InMemoryWorkloadDriver::new()).await;

    h.store.create(create_test_app("web", 3, "app:v1")).unwrap();

    assert!(
        wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| {
            s.available_replicas == 3 && s.phase == AppPhase::Available
        }))
        .await
    );
    assert_eq!(h.driver.calls(), vec![call(3)]);

    h.running.shutdown().await;
}

#[tokio::test]
async fn test_spec_update_mid_pass_triggers_exactly_one_more_pass() {
    let driver = InMemoryWorkloadDriver::new();
    driver.hold_ensures();
    let h = start(driver).await;
    let queue = h.running.queue().clone();

    h.store.create(create_test_app("web", 3, "app:v1")).unwrap();
    assert!(wait_for(TIMEOUT, || h.driver.calls().len() == 1).await);

    h.store.update_spec(&test_id("web"), ReplicatedAppSpec::new(5, "app:v1")).unwrap();
    assert!(wait_for(TIMEOUT, || queue.is_dirty(&test_id("web"))).await);
    h.driver.open_ensures();

    assert!(
        wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| {
            s.available_replicas == 5 && s.observed_generation == Some(2)
        }))
        .await
    );
    // Give any stray redelivery a chance to show up
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.driver.calls(), vec![call(3), call(5)]);
    assert_eq!(h.running.metrics().total_passes(), 2);
    assert_eq!(h.running.metrics().passes("retry"), 1);
    assert_eq!(h.running.metrics().passes("converged"), 1);

    h.running.shutdown().await;
}

#[tokio::test]
async fn test_invalid_spec_parks_until_corrected() {
    let h = start(InMemoryWorkloadDriver::new()).await;

    h.store.create(create_test_app("web", -1, "app:v1")).unwrap();
    assert!(
        wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| {
            s.phase == AppPhase::Failed
                && s.condition(CONDITION_READY).and_then(|c| c.reason.as_deref()) == Some(REASON_INVALID_SPEC)
        }))
        .await
    );

    // Redeliveries (resync, duplicate events) do not reach the driver
    for _ in 0..3 {
        h.running.queue().enqueue(test_id("web"));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(wait_for(TIMEOUT, || h.running.metrics().passes("skipped") >= 1).await);
    assert!(h.driver.calls().is_empty());

    h.store.update_spec(&test_id("web"), ReplicatedAppSpec::new(2, "app:v1")).unwrap();
    assert!(
        wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| {
            s.phase == AppPhase::Available && s.available_replicas == 2
        }))
        .await
    );
    assert_eq!(h.driver.calls(), vec![call(2)]);

    h.running.shutdown().await;
}

#[tokio::test]
async fn test_progress_is_polled_until_available() {
    let driver = InMemoryWorkloadDriver::with_availability(workload_client::Availability::Manual);
    let h = start(driver).await;

    h.store.create(create_test_app("web", 3, "app:v1")).unwrap();
    assert!(wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| s.phase == AppPhase::Progressing)).await);

    h.driver.set_available("default", "web", 3);
    assert!(
        wait_for(TIMEOUT, || status_matches(&h.store, "web", |s| {
            s.phase == AppPhase::Available && s.available_replicas == 3
        }))
        .await
    );
    assert_eq!(h.driver.calls().len(), 1);

    h.running.shutdown().await;
}

#[tokio::test]
async fn test_deleted_app_workload_is_removed() {
    let h = start(InMemoryWorkloadDriver::new()).await;

    h.store.create(create_test_app("web", 2, "app:v1")).unwrap();
    assert!(wait_for(TIMEOUT, || h.driver.workload("default", "web").is_some()).await);

    h.store.delete(&test_id("web")).unwrap();
    assert!(wait_for(TIMEOUT, || h.driver.workload("default", "web").is_none()).await);
    assert!(wait_for(TIMEOUT, || h.running.metrics().passes("removed") == 1).await);

    h.running.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_pass_finish() {
    let driver = InMemoryWorkloadDriver::new();
    driver.hold_ensures();
    let h = start(driver).await;

    h.store.create(create_test_app("web", 3, "app:v1")).unwrap();
    assert!(wait_for(TIMEOUT, || h.driver.calls().len() == 1).await);

    let driver = h.driver.clone();
    let store = h.store.clone();
    let shutdown = tokio::spawn(h.running.shutdown());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());

    driver.open_ensures();
    shutdown.await.unwrap();

    // The held action was applied and reported, not abandoned
    assert_eq!(driver.workload("default", "web").unwrap().replicas, 3);
    assert!(status_matches(&store, "web", |s| s.available_replicas == 3));
}
