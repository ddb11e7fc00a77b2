use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

/// How often upload progress is logged.
///
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Integer percentage of `done` out of `total`, capped at 100.
///
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

/// Collects byte counts of one upload and logs `"<file>: <n>%"` lines on a
/// fixed tick.
///
/// Every byte is also added to `overall`, shared by all files of a lease.
///
pub struct ProgressReporter {
    sender: UnboundedSender<u64>,
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    pub fn start(file: String, total: u64, interval: Duration, overall: Arc<AtomicU64>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<u64>();

        let handle = tokio::spawn(async move {
            let mut done = 0u64;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    chunk = receiver.recv() => match chunk {
                        Some(bytes) => {
                            done += bytes;
                            overall.fetch_add(bytes, Ordering::Relaxed);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        tracing::info!(target: "service", "{}: {}%", file, percent(done, total));
                    }
                }
            }
            tracing::info!(target: "service", "{}: {}%", file, percent(done, total));
            done
        });

        Self { sender, handle }
    }

    /// A sink for byte counts. The reporter stops once every sink is gone.
    ///
    pub fn sender(&self) -> UnboundedSender<u64> {
        self.sender.clone()
    }

    /// Closes the reporter's own sink and waits for it to drain.
    ///
    /// # Returns
    ///
    /// Number of bytes reported.
    ///
    pub async fn finish(self) -> u64 {
        drop(self.sender);
        self.handle.await.unwrap_or_default()
    }
}
