//! ReplicatedApp Controller
//!
//! Converges ReplicatedApp custom resources:
//! - watches the API store and feeds a deduplicating work queue
//! - a bounded worker pool runs Fetch → Diff → Act → Report passes
//! - status is written back with optimistic concurrency on resourceVersion
//!
//! Transient failures back off per object; permanent ones park the object
//! with a `Failed` status until its spec changes.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod queue;
mod reconciler;
mod server;
mod status_writer;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    init_tracing();

    // kube's rustls stack needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting ReplicatedApp Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Store: {:?}", config.store_mode);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workload driver: {}", config.driver_url.as_deref().unwrap_or("in-memory"));
    info!("  Workers: {}", config.worker_count);
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Backoff: {:?}..{:?}", config.backoff_min, config.backoff_max);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
