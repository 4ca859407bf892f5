//! Prometheus metrics for the controller
//!
//! Metrics live in their own `Registry` rather than the global default so
//! several controllers (tests) can coexist in one process.

use crate::error::ControllerError;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    status_conflicts: IntCounter,
    queue_depth: IntGauge,
    reconcile_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("replicated_app".to_string()), None)?;

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Reconcile passes by outcome"),
            &["outcome"],
        )?;
        let status_conflicts = IntCounter::new(
            "status_conflicts_total",
            "Status writes rejected because the object changed",
        )?;
        let queue_depth = IntGauge::new("queue_depth", "Identities waiting in the work queue")?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "reconcile_duration_seconds",
            "Duration of a reconcile pass",
        ))?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(status_conflicts.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            status_conflicts,
            queue_depth,
            reconcile_duration,
        })
    }

    pub fn record_pass(&self, outcome: &str, seconds: f64) {
        self.reconcile_total.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(seconds);
    }

    pub fn record_conflict(&self) {
        self.status_conflicts.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Passes recorded with `outcome`
    pub fn passes(&self, outcome: &str) -> u64 {
        self.reconcile_total.with_label_values(&[outcome]).get()
    }

    /// Passes recorded across every outcome
    pub fn total_passes(&self) -> u64 {
        self.reconcile_duration.get_sample_count()
    }

    pub fn conflicts(&self) -> u64 {
        self.status_conflicts.get()
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
