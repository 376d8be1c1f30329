//! Queued units of storage work and the handles that await them.
//!
//! A [`Job`] carries its target path (the coalescing key), the pending action
//! and a cancellation token. It moves through `queued -> run -> finished ->
//! completed`; both `run` and `complete` take effect at most once. When a
//! newer job for the same path replaces a queued one, the newer job joins the
//! older one and hands it its outcome on completion. If the newer job is
//! cancelled, the older one runs its own action instead.

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lifeline_path::PathBuilder;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SaveError, SaveResult};
use crate::pool::Pooled;

/// The work a job performs against its own path buffer.
pub type JobAction<T> = Box<dyn FnOnce(&mut PathBuilder) -> SaveResult<T> + Send>;

/// Type-erased view of a job as held by the queue.
pub trait QueuedJob: Send + Sync {
    /// Execute the action unless already run or cancelled.
    fn run(&self);

    /// Deliver the outcome to the awaiting handle and to the joined job.
    fn complete(&self);

    fn is_finished(&self) -> bool;

    fn is_completed(&self) -> bool;

    /// Make this job responsible for completing `previous` as well.
    fn join(&self, previous: Arc<dyn QueuedJob>) -> SaveResult<()>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// One unit of queued work producing a `T`.
pub struct Job<T> {
    path: Mutex<Option<Pooled<PathBuilder>>>,
    action: Mutex<Option<JobAction<T>>>,
    token: CancellationToken,
    finished: AtomicBool,
    completed: AtomicBool,
    outcome: Mutex<Option<SaveResult<T>>>,
    sender: Mutex<Option<oneshot::Sender<SaveResult<T>>>>,
    joined: Mutex<Option<Arc<Job<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Job<T> {
    /// Build a job and the handle its caller awaits.
    pub fn new(
        path: Pooled<PathBuilder>,
        action: JobAction<T>,
        token: CancellationToken,
    ) -> (Arc<Self>, JobHandle<T>) {
        let (sender, receiver) = oneshot::channel();
        let job = Arc::new(Self {
            path: Mutex::new(Some(path)),
            action: Mutex::new(Some(action)),
            token: token.clone(),
            finished: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            outcome: Mutex::new(None),
            sender: Mutex::new(Some(sender)),
            joined: Mutex::new(None),
        });
        (job, JobHandle { receiver, token })
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn execute(&self) -> SaveResult<T> {
        if self.token.is_cancelled() {
            return Err(SaveError::Cancelled);
        }
        let Some(action) = self.action.lock().take() else {
            return Err(SaveError::Abandoned);
        };
        let mut slot = self.path.lock();
        match slot.as_mut() {
            Some(path) => action(path),
            None => Err(SaveError::Abandoned),
        }
    }

    fn deliver(&self, outcome: SaveResult<T>) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        if let Err(Err(err)) = sender.send(outcome) {
            if err != SaveError::Cancelled {
                warn!(error = %err, "async job failed with nobody awaiting it");
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> QueuedJob for Job<T> {
    fn run(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let outcome = self.execute();
        let cancelled = matches!(outcome, Err(SaveError::Cancelled));
        *self.outcome.lock() = Some(outcome);
        // Hand the buffer back to the pool as soon as the work is done.
        self.path.lock().take();
        if cancelled {
            debug!("cancelled job skipped");
            let joined = self.joined.lock().clone();
            if let Some(joined) = joined {
                joined.run();
            }
        }
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.finished.store(true, Ordering::Release);
        let outcome = self.outcome.lock().take().unwrap_or_else(|| {
            if self.token.is_cancelled() {
                Err(SaveError::Cancelled)
            } else {
                Err(SaveError::Abandoned)
            }
        });
        let handed_back = self.token.is_cancelled() && matches!(outcome, Err(SaveError::Cancelled));
        self.deliver(outcome.clone());
        let joined = self.joined.lock().take();
        if let Some(joined) = joined {
            if handed_back {
                joined.run();
            } else {
                *joined.outcome.lock() = Some(outcome);
            }
            joined.complete();
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn join(&self, previous: Arc<dyn QueuedJob>) -> SaveResult<()> {
        let mut joined = self.joined.lock();
        if joined.is_some() {
            return Err(SaveError::AlreadyJoined);
        }
        let previous = previous
            .as_any()
            .downcast::<Job<T>>()
            .map_err(|_| SaveError::JobKindMismatch(std::any::type_name::<T>().into()))?;
        *joined = Some(previous);
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Awaitable handle to a queued job.
///
/// Awaiting yields the job's outcome, or [`SaveError::Cancelled`] as soon as
/// the job's token fires, without waiting for the queue to reach it.
pub struct JobHandle<T> {
    receiver: oneshot::Receiver<SaveResult<T>>,
    token: CancellationToken,
}

impl<T: Send + 'static> JobHandle<T> {
    /// A handle that is already resolved, for requests needing no work.
    pub fn ready(outcome: SaveResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        // The receiver is alive, so the send cannot fail.
        let _ = sender.send(outcome);
        Self {
            receiver,
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Has no effect once the job has run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The outcome, if the job has already completed.
    pub fn try_outcome(&mut self) -> Option<SaveResult<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SaveError::Abandoned)),
        }
    }

    /// Block the current thread until the job completes.
    ///
    /// Returns [`SaveError::Cancelled`] at once if the token has already
    /// fired. A cancellation arriving while blocked is only seen once the
    /// queue completes the job; await the handle to resolve on it early.
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> SaveResult<T> {
        if self.token.is_cancelled() {
            return Err(SaveError::Cancelled);
        }
        self.receiver.blocking_recv().unwrap_or(Err(SaveError::Abandoned))
    }

    /// Drop the handle; a failure is then only logged.
    pub fn detach(self) {}
}

impl<T: Send + 'static> IntoFuture for JobHandle<T> {
    type Output = SaveResult<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = SaveResult<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        let JobHandle { receiver, token } = self;
        Box::pin(async move {
            tokio::select! {
                biased;
                outcome = receiver => outcome.unwrap_or(Err(SaveError::Abandoned)),
                _ = token.cancelled() => Err(SaveError::Cancelled),
            }
        })
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
