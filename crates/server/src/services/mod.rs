use crate::vsphere::Vsphere;
use crate::vsphere::types::{MoRef, TaskStatus};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmctl_common::error::{Error, Result};

pub mod deploy;
pub mod permissions;
pub mod vm;

/// How often the vCenter session is checked.
///
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Default limit for synchronous waits on remote tasks.
///
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

// -----------------------------------------------------------------------------

/// Polls a vSphere task until it is complete, with a timeout.
///
/// # Arguments
///
/// * `vsphere`: Client for interacting with the vSphere API.
/// * `task`: vSphere task to monitor.
/// * `wait_secs`: Interval in seconds between polling attempts.
/// * `timeout`: Optional total time in seconds before returning a timeout
///   error.
///
/// # Returns
///
/// The task's result value on success, if it has one.
///
pub async fn wait_until_finish(
    vsphere: &Arc<dyn Vsphere + Send + Sync>,
    task: &MoRef,
    wait_secs: u64,
    timeout: Option<u64>,
) -> Result<Option<Value>> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));

    loop {
        let elapsed = start.elapsed();
        if elapsed > timeout {
            return Err(Error::Timeout(elapsed.as_secs_f32()));
        }

        match vsphere.task_status(task).await? {
            TaskStatus::Pending => tokio::time::sleep(Duration::from_secs(wait_secs)).await,
            TaskStatus::Completed(result) => return Ok(result),
            TaskStatus::Failed(error) => return Err(Error::Any(error)),
        }
    }
}

// -----------------------------------------------------------------------------

/// Deadline and cancellation scope of one background task.
///
/// Futures run through [`TaskContext::run`] end early with `Deadline` or
/// `Canceled`, which then travel the regular error path of the worker.
///
#[derive(Debug, Clone)]
pub struct TaskContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Runs the future unless the task is cancelled or its deadline passes
    /// first.
    ///
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Canceled),
            _ = tokio::time::sleep_until(self.deadline) => Err(Error::Deadline),
            result = future => result,
        }
    }

    /// Checks the context before blocking work that cannot be interrupted.
    ///
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        if Instant::now() >= self.deadline {
            return Err(Error::Deadline);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------

/// Keeps the vCenter session alive, logging in again when it is gone.
///
/// Runs until `shutdown` is cancelled.
///
pub async fn keep_alive(vsphere: Arc<dyn Vsphere + Send + Sync>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match vsphere.session_alive().await {
                Ok(true) => tracing::trace!(target: "vsphere", "Session alive"),
                Ok(false) => {
                    tracing::warn!(target: "vsphere", "Session lost, logging in again");
                    if let Err(error) = vsphere.login().await {
                        tracing::error!(target: "vsphere", ?error, "Failed to restore session!");
                    }
                }
                Err(error) => tracing::warn!(target: "vsphere", ?error, "Session check failed"),
            },
        }
    }
}
