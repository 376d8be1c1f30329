//! Background task that runs queued jobs.
//!
//! The driver wakes whenever a job is queued, and at least once per
//! interval. Each pass executes the pending jobs on tokio's blocking pool,
//! then delivers their outcomes from the driver task itself.

use std::sync::Arc;
use std::time::Duration;

use lifeline_core::JobQueue;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{SdkError, SdkResult};

/// Handle to a running driver. Dropping it stops the driver.
pub struct Driver {
    token: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl Driver {
    /// Spawn a driver for `jobs` on the current tokio runtime.
    pub fn spawn(jobs: Arc<JobQueue>, config: &DriverConfig) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(jobs, config.interval(), token.clone()));
        Self {
            _guard: token.clone().drop_guard(),
            token,
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the driver after one last pass over the queue.
    pub async fn stop(self) -> SdkResult<()> {
        let Driver { token, task, _guard } = self;
        token.cancel();
        task.await
            .map_err(|err| SdkError::Internal(format!("job driver task failed: {err}")))
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(jobs: Arc<JobQueue>, interval: Duration, token: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = interval.as_millis() as u64, "job driver started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = jobs.notified() => {}
            _ = ticker.tick() => {}
        }
        pass(&jobs).await;
    }

    pass(&jobs).await;
    info!("job driver stopped");
}

/// Run everything pending, then complete everything finished.
async fn pass(jobs: &Arc<JobQueue>) {
    if jobs.has_pending() {
        let queue = Arc::clone(jobs);
        match tokio::task::spawn_blocking(move || queue.run_pending()).await {
            Ok(ran) if ran > 0 => debug!(jobs = ran, "driver pass executed jobs"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "job execution panicked"),
        }
    }
    jobs.complete_finished();
}
