//! Coalescing job queue.
//!
//! At most one job is pending per path: queuing a job for a path that
//! already has one replaces it, and the replacement completes both callers.
//! Execution and completion are separate phases so the driving environment
//! can run storage work on one thread and deliver results on another.

use std::collections::HashMap;
use std::sync::Arc;

use lifeline_path::PathBuilder;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SaveResult;
use crate::job::{Job, JobAction, JobHandle, QueuedJob};
use crate::pool::Pooled;

struct Pending {
    seq: u64,
    job: Arc<dyn QueuedJob>,
}

#[derive(Default)]
struct PendingJobs {
    next_seq: u64,
    by_path: HashMap<PathBuilder, Pending>,
}

/// Pending and finished jobs of one serializer.
#[derive(Default)]
pub struct JobQueue {
    pending: Mutex<PendingJobs>,
    finished: Mutex<Vec<Arc<dyn QueuedJob>>>,
    exec_lock: ReentrantMutex<()>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` to run against `path`.
    ///
    /// Fails if a job with a different result type is already pending for
    /// the same path.
    pub fn enqueue<T, F>(&self, path: Pooled<PathBuilder>, action: F) -> SaveResult<JobHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut PathBuilder) -> SaveResult<T> + Send + 'static,
    {
        self.enqueue_with_token(path, Box::new(action), CancellationToken::new())
    }

    /// Like [`Self::enqueue`], cancelled through the given token.
    pub fn enqueue_with_token<T>(
        &self,
        path: Pooled<PathBuilder>,
        action: JobAction<T>,
        token: CancellationToken,
    ) -> SaveResult<JobHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = PathBuilder::clone(&path);
        let (job, handle) = Job::new(path, action, token);
        {
            let mut pending = self.pending.lock();
            if let Some(previous) = pending.by_path.get(&key) {
                job.join(Arc::clone(&previous.job))?;
                debug!(path = %key, "job coalesced with pending job");
            }
            let seq = pending.next_seq;
            pending.next_seq += 1;
            pending.by_path.insert(key, Pending { seq, job });
        }
        self.notify.notify_one();
        Ok(handle)
    }

    /// Execute every pending job, including jobs queued meanwhile.
    ///
    /// Jobs run in the order their latest request was queued. Returns the
    /// number of jobs run.
    pub fn run_pending(&self) -> usize {
        let _exec = self.exec_lock.lock();
        let mut ran = 0;
        loop {
            let mut batch: Vec<Pending> = {
                let mut pending = self.pending.lock();
                if pending.by_path.is_empty() {
                    break;
                }
                pending.by_path.drain().map(|(_, entry)| entry).collect()
            };
            batch.sort_by_key(|entry| entry.seq);
            for entry in batch {
                entry.job.run();
                ran += 1;
                self.finished.lock().push(entry.job);
            }
        }
        if ran > 0 {
            debug!(count = ran, "pending jobs executed");
        }
        ran
    }

    /// Deliver the outcome of every finished job. Returns how many completed.
    pub fn complete_finished(&self) -> usize {
        let jobs = std::mem::take(&mut *self.finished.lock());
        for job in &jobs {
            job.complete();
        }
        jobs.len()
    }

    /// Wait for in-flight execution, run what is pending, then complete it.
    pub fn force_complete(&self) {
        self.run_pending();
        self.complete_finished();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().by_path.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().by_path.len()
    }

    pub fn finished_len(&self) -> usize {
        self.finished.lock().len()
    }

    /// Resolves after the next enqueue.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake a task waiting in [`Self::notified`].
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.pending_len())
            .field("finished", &self.finished_len())
            .finish()
    }
}
