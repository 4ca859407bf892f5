//! Main controller implementation.
//!
//! `Controller` wires the store, the workload driver, the work queue, the
//! watcher, the worker pool and the probe server together:
//!
//! ```text
//! store.watch() ──► ResourceWatcher ──► WorkQueue ──► workers ──► Reconciler
//!                                           ▲                        │
//!                                           └──── requeue / retry ───┘
//! ```
//!
//! Workers loop `dequeue → reconcile → done`. On shutdown the queue is
//! closed; a worker in the middle of a pass finishes it before exiting.

use crate::config::{Config, StoreMode};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::server::{self, ProbeState};
use crate::store::{ApiStore, InMemoryStore, KubeStore};
use crate::watcher::ResourceWatcher;
use kube::Client;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use workload_client::{InMemoryWorkloadDriver, WorkloadClient, WorkloadDriverTrait};

/// Main controller for ReplicatedApp resources.
pub struct Controller {
    config: Config,
    store: Arc<dyn ApiStore>,
    driver: Arc<dyn WorkloadDriverTrait>,
    metrics: Metrics,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("store", &self.store.describe())
            .field("driver", &self.driver.base_url())
            .field("workers", &self.config.worker_count)
            .finish()
    }
}

impl Controller {
    /// Creates a new controller instance from configuration.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing ReplicatedApp Controller");
        let registry = crds::registry();

        let store: Arc<dyn ApiStore> = match config.store_mode {
            StoreMode::Kube => {
                let client = Client::try_default().await?;
                Arc::new(KubeStore::new(client, config.namespace.clone(), registry).await?)
            }
            StoreMode::Memory => {
                let store = InMemoryStore::new(registry)?;
                if let Some(path) = &config.seed_file {
                    info!("Loading seed manifest {}", path.display());
                    let manifest = tokio::fs::read_to_string(path).await?;
                    store.seed_from_yaml(&manifest)?;
                }
                Arc::new(store)
            }
        };

        let driver: Arc<dyn WorkloadDriverTrait> = match &config.driver_url {
            Some(url) => {
                let client = WorkloadClient::new(url.clone(), config.driver_token.clone())?;
                info!("Validating workload driver connectivity at {}...", url);
                match client.validate_connection().await {
                    Ok(()) => info!("Workload driver reachable"),
                    // Not fatal: passes back off until the driver comes up
                    Err(e) => warn!("Workload driver not reachable yet: {}", e),
                }
                Arc::new(client)
            }
            None => {
                warn!("WORKLOAD_DRIVER_URL not set, using the in-memory workload driver");
                Arc::new(InMemoryWorkloadDriver::new())
            }
        };

        Self::from_parts(config, store, driver)
    }

    /// Creates a controller from already-built collaborators.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn ApiStore>,
        driver: Arc<dyn WorkloadDriverTrait>,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            config,
            store,
            driver,
            metrics: Metrics::new()?,
        })
    }

    /// Spawns the probe server, the watcher and the workers.
    pub async fn start(self) -> Result<RunningController, ControllerError> {
        let queue = Arc::new(WorkQueue::new());
        let ready = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = Arc::new(Reconciler::new(
            self.store.clone(),
            self.driver.clone(),
            self.metrics.clone(),
            &self.config,
        ));

        let listener = TcpListener::bind(self.config.probe_addr).await?;
        let probe_addr = listener.local_addr()?;

        let mut background = JoinSet::new();
        background.spawn(server::serve(
            listener,
            ProbeState {
                ready: ready.clone(),
                metrics: self.metrics.clone(),
            },
            shutdown_rx.clone(),
        ));
        let watcher = ResourceWatcher::new(
            self.store.clone(),
            queue.clone(),
            self.config.resync_interval,
            ready.clone(),
        );
        background.spawn(watcher.run(shutdown_rx));

        let workers = (0..self.config.worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    queue.clone(),
                    reconciler.clone(),
                    self.metrics.clone(),
                ))
            })
            .collect();

        info!(
            "ReplicatedApp Controller started: {} worker(s), {}, driver {}",
            self.config.worker_count,
            self.store.describe(),
            self.driver.base_url()
        );

        Ok(RunningController {
            shutdown_tx,
            queue,
            ready,
            metrics: self.metrics,
            probe_addr,
            background,
            workers,
        })
    }

    /// Runs the controller until Ctrl-C or until a background task fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        let mut running = self.start().await?;
        info!("Probes served on {}", running.probe_addr());

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
            result = running.wait_for_failure() => {
                if let Err(e) = &result {
                    error!("Controller task failed: {}", e);
                }
                result
            }
        };

        running.shutdown().await;
        result
    }
}

async fn worker_loop(id: usize, queue: Arc<WorkQueue>, reconciler: Arc<Reconciler>, metrics: Metrics) {
    debug!("Worker {} started", id);
    while let Some(identity) = queue.dequeue().await {
        metrics.set_queue_depth(queue.len());
        match reconciler.reconcile(&identity).await {
            ReconcileOutcome::Retry => queue.enqueue(identity.clone()),
            ReconcileOutcome::RequeueAfter(delay) => queue.requeue_after(identity.clone(), delay),
            ReconcileOutcome::Converged
            | ReconcileOutcome::Removed
            | ReconcileOutcome::Parked
            | ReconcileOutcome::Skipped => {}
        }
        queue.done(&identity);
    }
    debug!("Worker {} stopped", id);
}

/// Handle to a started controller.
pub struct RunningController {
    shutdown_tx: watch::Sender<bool>,
    queue: Arc<WorkQueue>,
    ready: Arc<AtomicBool>,
    metrics: Metrics,
    probe_addr: SocketAddr,
    background: JoinSet<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RunningController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningController")
            .field("probe_addr", &self.probe_addr)
            .field("workers", &self.workers.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl RunningController {
    pub fn probe_addr(&self) -> SocketAddr {
        self.probe_addr
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// True once the initial relist has completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Resolves when the watcher or the probe server stops on its own.
    async fn wait_for_failure(&mut self) -> Result<(), ControllerError> {
        match self.background.join_next().await {
            Some(Ok(Ok(()))) => Err(ControllerError::Watch("background task exited unexpectedly".to_string())),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(ControllerError::Watch(format!("background task panicked: {}", e))),
            None => std::future::pending().await,
        }
    }

    /// Stops accepting work, lets in-flight passes finish and joins every task.
    pub async fn shutdown(mut self) {
        info!("Shutting down ReplicatedApp Controller");
        let _ = self.shutdown_tx.send(true);
        self.queue.shutdown();

        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
        while let Some(result) = self.background.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task ended with error: {}", e),
                Err(e) => error!("Background task failed: {}", e),
            }
        }
        info!("ReplicatedApp Controller stopped");
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
