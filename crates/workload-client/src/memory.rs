//! In-memory workload driver
//!
//! Keeps workloads in a map instead of talking to an orchestration API.
//! The controller uses it when no driver URL is configured, and tests use it
//! to script failures, control availability and inspect issued calls.

use crate::driver_trait::WorkloadDriverTrait;
use crate::error::WorkloadError;
use crate::models::WorkloadState;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tracing::debug;

type WorkloadKey = (String, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How many replicas become available after `ensure_replicas`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
    /// Every requested replica is available at once
    #[default]
    Immediate,
    /// Availability is pinned to a fixed number
    Fixed(u32),
    /// Availability only changes through `set_available`
    Manual,
}

/// A recorded `ensure_replicas` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureCall {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub replicas: u32,
}

/// In-memory workload driver
#[derive(Clone, Default)]
pub struct InMemoryWorkloadDriver {
    workloads: Arc<Mutex<HashMap<WorkloadKey, WorkloadState>>>,
    calls: Arc<Mutex<Vec<EnsureCall>>>,
    removed: Arc<Mutex<Vec<WorkloadKey>>>,
    ensure_failures: Arc<Mutex<VecDeque<WorkloadError>>>,
    read_failures: Arc<Mutex<VecDeque<WorkloadError>>>,
    availability: Arc<Mutex<Availability>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl std::fmt::Debug for InMemoryWorkloadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWorkloadDriver")
            .field("workloads", &lock(&self.workloads).len())
            .field("calls", &lock(&self.calls).len())
            .finish()
    }
}

impl InMemoryWorkloadDriver {
    /// Create a driver where requested replicas become available immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver with the given availability model
    pub fn with_availability(availability: Availability) -> Self {
        let driver = Self::default();
        driver.set_availability(availability);
        driver
    }

    pub fn set_availability(&self, availability: Availability) {
        *lock(&self.availability) = availability;
    }

    /// Override the available count of a known workload.
    ///
    /// Returns `false` if the workload does not exist.
    pub fn set_available(&self, namespace: &str, name: &str, available: u32) -> bool {
        let key = (namespace.to_string(), name.to_string());
        match lock(&self.workloads).get_mut(&key) {
            Some(state) => {
                state.available_replicas = available;
                true
            }
            None => false,
        }
    }

    /// Seed a workload as if it had been applied earlier
    pub fn insert_workload(&self, namespace: &str, name: &str, state: WorkloadState) {
        lock(&self.workloads).insert((namespace.to_string(), name.to_string()), state);
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadState> {
        lock(&self.workloads)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fail the next `ensure_replicas` call with `error`
    pub fn fail_next_ensure(&self, error: WorkloadError) {
        lock(&self.ensure_failures).push_back(error);
    }

    /// Fail the next `current_state`/`current_available` call with `error`
    pub fn fail_next_read(&self, error: WorkloadError) {
        lock(&self.read_failures).push_back(error);
    }

    /// Every `ensure_replicas` call received so far, in order
    pub fn calls(&self) -> Vec<EnsureCall> {
        lock(&self.calls).clone()
    }

    /// `ensure_replicas` calls for one workload
    pub fn calls_for(&self, namespace: &str, name: &str) -> Vec<EnsureCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.namespace == namespace && c.name == name)
            .cloned()
            .collect()
    }

    /// Workloads removed so far, as `(namespace, name)`
    pub fn removed(&self) -> Vec<(String, String)> {
        lock(&self.removed).clone()
    }

    /// Make `ensure_replicas` wait after recording the call until released
    pub fn hold_ensures(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held `ensure_replicas` calls proceed
    pub fn release_ensures(&self, count: usize) {
        if let Some(gate) = lock(&self.gate).as_ref() {
            gate.add_permits(count);
        }
    }

    /// Stop holding calls and let every waiting call proceed
    pub fn open_ensures(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.close();
        }
    }

    async fn wait_at_gate(&self) {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            // A closed gate means open_ensures() was called
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn take_read_failure(&self) -> Result<(), WorkloadError> {
        match lock(&self.read_failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl WorkloadDriverTrait for InMemoryWorkloadDriver {
    fn base_url(&self) -> &str {
        "memory://workload-driver"
    }

    async fn validate_connection(&self) -> Result<(), WorkloadError> {
        Ok(())
    }

    async fn ensure_replicas(&self, namespace: &str, name: &str, image: &str, count: u32) -> Result<(), WorkloadError> {
        lock(&self.calls).push(EnsureCall {
            namespace: namespace.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            replicas: count,
        });

        self.wait_at_gate().await;

        if let Some(error) = lock(&self.ensure_failures).pop_front() {
            return Err(error);
        }

        let availability = *lock(&self.availability);
        let mut workloads = lock(&self.workloads);
        let state = workloads
            .entry((namespace.to_string(), name.to_string()))
            .or_insert_with(|| WorkloadState {
                image: image.to_string(),
                replicas: 0,
                available_replicas: 0,
            });
        state.image = image.to_string();
        state.replicas = count;
        match availability {
            Availability::Immediate => state.available_replicas = count,
            Availability::Fixed(n) => state.available_replicas = n,
            Availability::Manual => {}
        }
        debug!("In-memory workload {}/{} now {} x {}", namespace, name, count, image);
        Ok(())
    }

    async fn current_available(&self, namespace: &str, name: &str) -> Result<u32, WorkloadError> {
        Ok(self
            .current_state(namespace, name)
            .await?
            .map_or(0, |state| state.available_replicas))
    }

    async fn current_state(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>, WorkloadError> {
        self.take_read_failure()?;
        Ok(self.workload(namespace, name))
    }

    async fn remove(&self, namespace: &str, name: &str) -> Result<(), WorkloadError> {
        let key = (namespace.to_string(), name.to_string());
        lock(&self.workloads).remove(&key);
        lock(&self.removed).push(key);
        Ok(())
    }
}
