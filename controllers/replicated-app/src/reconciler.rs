//! ReplicatedApp reconciler
//!
//! One pass runs Fetch → Diff → Act → Report against an owned snapshot of
//! the object:
//! - Fetch: read the object; if it is gone, remove its workload (Removed)
//! - Diff: compare the spec with the workload the driver currently runs
//! - Act: one idempotent `ensure_replicas` call when anything differs
//! - Report: derive status from `current_available()` after acting and
//!   write it only if the observation changed
//!
//! A pass always finishes against the snapshot it fetched. Spec changes that
//! arrive meanwhile are picked up by the redelivery the work queue performs
//! after `done`.

use crate::backoff::BackoffRegistry;
use crate::config::Config;
use crate::error::{ErrorClass, ReconcileError};
use crate::metrics::Metrics;
use crate::status_writer::{StatusWriter, WriteOutcome};
use crate::store::ApiStore;
use chrono::Utc;
use crds::{
    AppCondition, AppPhase, CrdError, ReplicatedApp, ReplicatedAppStatus, ResourceIdentity,
    REASON_INVALID_SPEC,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use workload_client::{WorkloadDriverTrait, WorkloadState};

/// Reason reported while replicas are still coming up (or draining)
pub const REASON_PROGRESSING: &str = "Progressing";

/// Reason reported once available replicas match the spec
pub const REASON_AVAILABLE: &str = "Available";

/// Reason reported when the workload driver rejects the spec
pub const REASON_DRIVER_REJECTED: &str = "DriverRejected";

/// What the worker should do with the identity after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Workload matches the spec and status is up to date
    Converged,
    /// Object is gone and its workload was removed
    Removed,
    /// Run another pass as soon as this one is done (status conflict)
    Retry,
    /// Run another pass after the delay
    RequeueAfter(Duration),
    /// Spec cannot be acted upon; wait for a new generation
    Parked,
    /// Object is parked at this generation; nothing was done
    Skipped,
}

impl ReconcileOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Converged => "converged",
            ReconcileOutcome::Removed => "removed",
            ReconcileOutcome::Retry => "retry",
            ReconcileOutcome::RequeueAfter(_) => "requeue",
            ReconcileOutcome::Parked => "parked",
            ReconcileOutcome::Skipped => "skipped",
        }
    }
}

/// Corrective action computed by `diff`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadAction {
    /// No workload exists yet
    Create { image: String, replicas: u32 },
    /// Workload runs another image
    UpdateImage { from: String, to: String },
    /// Workload runs another replica count
    Scale { from: u32, to: u32 },
}

impl fmt::Display for WorkloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadAction::Create { image, replicas } => write!(f, "create {} x {}", replicas, image),
            WorkloadAction::UpdateImage { from, to } => write!(f, "roll out {} -> {}", from, to),
            WorkloadAction::Scale { from, to } => write!(f, "scale {} -> {}", from, to),
        }
    }
}

/// Compute the actions that bring `live` to `desired` replicas of `image`.
///
/// An absent workload with zero desired replicas needs nothing.
pub fn diff(desired: u32, image: &str, live: Option<&WorkloadState>) -> Vec<WorkloadAction> {
    let Some(live) = live else {
        if desired == 0 {
            return Vec::new();
        }
        return vec![WorkloadAction::Create {
            image: image.to_string(),
            replicas: desired,
        }];
    };

    let mut actions = Vec::new();
    if live.image != image {
        actions.push(WorkloadAction::UpdateImage {
            from: live.image.clone(),
            to: image.to_string(),
        });
    }
    if live.replicas != desired {
        actions.push(WorkloadAction::Scale {
            from: live.replicas,
            to: desired,
        });
    }
    actions
}

/// Build the status describing `available` of `desired` replicas.
///
/// Starts from the stored status so condition transition times and
/// `lastReconciled` only move when something actually changed.
pub fn observed_status(app: &ReplicatedApp, desired: u32, available: u32) -> ReplicatedAppStatus {
    let mut status = app.status.clone().unwrap_or_default();
    let phase = if available == desired {
        AppPhase::Available
    } else {
        AppPhase::Progressing
    };

    status.available_replicas = available;
    status.observed_generation = app.metadata.generation;
    let message = format!("{}/{} replicas available", available, desired);
    let condition = if phase == AppPhase::Available {
        AppCondition::ready(true, REASON_AVAILABLE, message)
    } else {
        AppCondition::ready(false, REASON_PROGRESSING, message)
    };
    status.set_condition(condition);
    if status.phase != phase {
        status.last_reconciled = Some(Utc::now());
        status.phase = phase;
    }
    status
}

/// Build the status for a spec that cannot be acted upon.
pub fn failed_status(app: &ReplicatedApp, available: u32, reason: &str, message: &str) -> ReplicatedAppStatus {
    let mut status = app.status.clone().unwrap_or_default();
    status.available_replicas = available;
    status.observed_generation = app.metadata.generation;
    status.set_condition(AppCondition::ready(false, reason, message));
    if status.phase != AppPhase::Failed {
        status.last_reconciled = Some(Utc::now());
        status.phase = AppPhase::Failed;
    }
    status
}

/// True if the stored status says this generation was already parked.
fn parked_at_current_generation(app: &ReplicatedApp) -> bool {
    app.status.as_ref().is_some_and(|status| {
        status.phase == AppPhase::Failed
            && status.observed_generation.is_some()
            && status.observed_generation == app.metadata.generation
    })
}

/// ReplicatedApp reconciler
pub struct Reconciler {
    store: Arc<dyn ApiStore>,
    driver: Arc<dyn WorkloadDriverTrait>,
    status_writer: StatusWriter,
    backoff: BackoffRegistry,
    metrics: Metrics,
    progress_interval: Duration,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store.describe())
            .field("driver", &self.driver.base_url())
            .field("progress_interval", &self.progress_interval)
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ApiStore>,
        driver: Arc<dyn WorkloadDriverTrait>,
        metrics: Metrics,
        config: &Config,
    ) -> Self {
        Self {
            status_writer: StatusWriter::new(store.clone(), metrics.clone()),
            store,
            driver,
            backoff: BackoffRegistry::new(config.backoff_min, config.backoff_max),
            metrics,
            progress_interval: config.progress_interval,
        }
    }

    /// Run one pass for `identity`.
    ///
    /// Never fails: every error is translated into an outcome so one
    /// identity's failure cannot take a worker down.
    pub async fn reconcile(&self, identity: &ResourceIdentity) -> ReconcileOutcome {
        let started = Instant::now();
        let outcome = self.run_pass(identity).await;
        self.metrics
            .record_pass(outcome.label(), started.elapsed().as_secs_f64());
        debug!("Pass for {} finished: {:?}", identity, outcome);
        outcome
    }

    async fn run_pass(&self, identity: &ResourceIdentity) -> ReconcileOutcome {
        // Fetch
        let app = match self.store.get(identity).await {
            Ok(Some(app)) => app,
            Ok(None) => return self.cleanup(identity).await,
            Err(e) => return self.handle_error(identity, None, ReconcileError::from(e)).await,
        };

        if parked_at_current_generation(&app) {
            debug!(
                "ReplicatedApp {} is parked at generation {:?}, waiting for a spec change",
                identity, app.metadata.generation
            );
            return ReconcileOutcome::Skipped;
        }

        match self.converge(identity, &app).await {
            Ok(outcome) => outcome,
            Err(e) => self.handle_error(identity, Some(&app), e).await,
        }
    }

    async fn converge(&self, identity: &ResourceIdentity, app: &ReplicatedApp) -> Result<ReconcileOutcome, ReconcileError> {
        let (ns, name) = (identity.namespace(), identity.name());
        app.spec.validate()?;
        let desired = app
            .spec
            .desired_replicas()
            .ok_or_else(|| CrdError::InvalidSpec(format!("replicas must be >= 0, got {}", app.spec.replicas)))?;
        let image = app.spec.image.as_str();

        // Diff
        let live = self.driver.current_state(ns, name).await?;
        let actions = diff(desired, image, live.as_ref());

        // Act
        if !actions.is_empty() {
            let summary: Vec<String> = actions.iter().map(ToString::to_string).collect();
            info!("Reconciling ReplicatedApp {}: {}", identity, summary.join(", "));
            self.driver.ensure_replicas(ns, name, image, desired).await?;
        }

        // Report
        let available = self.driver.current_available(ns, name).await?;
        let status = observed_status(app, desired, available);
        match self.status_writer.publish(app, &status).await? {
            WriteOutcome::Written(version) => {
                debug!("Status of {} now at version {} ({} available)", identity, version, available);
            }
            WriteOutcome::Unchanged => {}
        }

        self.backoff.reset(identity);
        if available == desired {
            if !actions.is_empty() {
                info!("ReplicatedApp {} converged: {} replicas of {}", identity, desired, image);
            }
            Ok(ReconcileOutcome::Converged)
        } else {
            debug!(
                "ReplicatedApp {} progressing: {}/{} available, checking again in {:?}",
                identity, available, desired, self.progress_interval
            );
            Ok(ReconcileOutcome::RequeueAfter(self.progress_interval))
        }
    }

    async fn handle_error(&self, identity: &ResourceIdentity, app: Option<&ReplicatedApp>, error: ReconcileError) -> ReconcileOutcome {
        match error.classify() {
            ErrorClass::Transient if error.is_conflict() => {
                info!("ReplicatedApp {} changed during the pass, re-running", identity);
                ReconcileOutcome::Retry
            }
            ErrorClass::Transient => self.retry_later(identity, &error),
            ErrorClass::NotFound => {
                info!("ReplicatedApp {} disappeared during the pass", identity);
                self.cleanup(identity).await
            }
            ErrorClass::Permanent => match app {
                Some(app) => self.park(identity, app, &error).await,
                None => {
                    error!("Permanent error for {} without an object to report on: {}", identity, error);
                    ReconcileOutcome::Skipped
                }
            },
        }
    }

    fn retry_later(&self, identity: &ResourceIdentity, error: &ReconcileError) -> ReconcileOutcome {
        let (delay, attempts) = self.backoff.next_delay(identity);
        warn!(
            "Reconcile of {} failed (attempt {}), retrying in {:?}: {}",
            identity, attempts, delay, error
        );
        ReconcileOutcome::RequeueAfter(delay)
    }

    /// Report a permanent failure on the status and stop acting until the
    /// spec changes.
    async fn park(&self, identity: &ResourceIdentity, app: &ReplicatedApp, error: &ReconcileError) -> ReconcileOutcome {
        let (reason, message) = match error {
            ReconcileError::Invalid(CrdError::InvalidSpec(problems)) => (REASON_INVALID_SPEC, problems.clone()),
            ReconcileError::Workload(e) => (REASON_DRIVER_REJECTED, e.to_string()),
            other => (REASON_INVALID_SPEC, other.to_string()),
        };
        error!("ReplicatedApp {} cannot be reconciled ({}): {}", identity, reason, message);

        // Availability is reported truthfully even for a failed spec
        let available = match self.driver.current_available(identity.namespace(), identity.name()).await {
            Ok(available) => available,
            Err(e) => {
                debug!("Keeping last known availability for {}: {}", identity, e);
                app.status.as_ref().map_or(0, |s| s.available_replicas)
            }
        };

        let status = failed_status(app, available, reason, &message);
        match self.status_writer.publish(app, &status).await {
            Ok(_) => {
                self.backoff.reset(identity);
                ReconcileOutcome::Parked
            }
            Err(e) => {
                let e = ReconcileError::from(e);
                match e.classify() {
                    ErrorClass::Transient if e.is_conflict() => ReconcileOutcome::Retry,
                    ErrorClass::NotFound => self.cleanup(identity).await,
                    _ => self.retry_later(identity, &e),
                }
            }
        }
    }

    /// Remove the workload of a deleted object
    async fn cleanup(&self, identity: &ResourceIdentity) -> ReconcileOutcome {
        match self.driver.remove(identity.namespace(), identity.name()).await {
            Ok(()) => {
                info!("ReplicatedApp {} deleted, workload removed", identity);
                self.backoff.forget(identity);
                ReconcileOutcome::Removed
            }
            Err(e) => {
                let e = ReconcileError::from(e);
                if e.classify() == ErrorClass::Transient {
                    self.retry_later(identity, &e)
                } else {
                    error!("Giving up removing workload of {}: {}", identity, e);
                    self.backoff.forget(identity);
                    ReconcileOutcome::Removed
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
