use crate::config::VmwareDefaults;
use crate::metrics::Metrics;
use crate::tasks::TaskRegistry;
use crate::vsphere::Vsphere;
use std::fmt::{Debug, Formatter, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Holds the application's shared state, like the vSphere client and the task
/// registry, across Axum handlers and deployment workers.
///
#[derive(Clone)]
pub struct AppState {
    pub vsphere: Arc<dyn Vsphere + Send + Sync>,
    pub tasks: Arc<TaskRegistry>,
    pub defaults: VmwareDefaults,
    /// Client for OVA downloads, separate from the vCenter session.
    pub downloader: reqwest::Client,
    /// Directory under which every deployment stages its OVA.
    pub staging_root: PathBuf,
    pub metrics: Arc<Metrics>,
    /// Parent of every worker's cancellation token.
    pub shutdown: CancellationToken,
    /// Running deployment workers, awaited on shutdown.
    pub workers: TaskTracker,
}

impl AppState {
    /// Builds the state with a fresh registry, metrics and shutdown token.
    /// OVAs are staged under the system temporary directory.
    ///
    pub fn new(
        vsphere: Arc<dyn Vsphere + Send + Sync>,
        defaults: VmwareDefaults,
        tasks: TaskRegistry,
    ) -> vmctl_common::prelude::Result<Self> {
        Ok(Self {
            vsphere,
            tasks: Arc::new(tasks),
            defaults,
            downloader: reqwest::Client::builder().use_rustls_tls().build()?,
            staging_root: std::env::temp_dir(),
            metrics: Arc::new(Metrics::new()?),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
        })
    }

    /// Stops accepting workers and waits for the running ones to record their
    /// outcome, leases included.
    ///
    pub async fn wait_for_workers(&self) {
        self.workers.close();
        tracing::info!(target: "server", running = self.workers.len(), "Waiting for deployments");
        self.workers.wait().await;
    }
}

impl Debug for AppState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("AppState")
            .field("Vsphere", &"Arc<dyn Vsphere>")
            .field("Tasks", &self.tasks.len())
            .field("Defaults", &self.defaults)
            .field("StagingRoot", &self.staging_root)
            .field("Workers", &self.workers.len())
            .finish()
    }
}
