//! Public types: jobs, job handles, and pool configuration.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::manager::JobManager;

/// A unit of work queued onto the pool.
///
/// A job owns its body until a worker (or a cooperative helper inside
/// [`JobManager::wait`]) takes it to run. Children created with
/// [`JobManager::create_child_job`] hold a reference to their parent so the
/// parent's completion can wait on the whole fan-out.
pub struct Job {
    pub(crate) id: u64,
    pub(crate) unfinished: AtomicI64,
    pub(crate) parent: Option<Arc<Job>>,
    pub(crate) body: Mutex<Option<JobBody>>,
}

/// The closure body of a job. It receives a [`JobContext`] so it can spawn
/// children of itself and reach back into the manager that is running it.
pub type JobBody = Box<dyn FnOnce(JobContext) + Send + 'static>;

/// Handed to a running job body so it can create and schedule children of
/// itself without threading a manager handle through every call site.
pub struct JobContext {
    /// The job currently executing.
    pub job: Arc<Job>,
    /// The pool this job is running on.
    pub manager: JobManager,
}

impl Job {
    /// Unique, monotonically assigned id. Useful for logging only — the
    /// pool does not use it for anything else.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` once the job (and every child fanned out from it) has settled,
    /// either by completing or by failing.
    pub fn is_settled(&self) -> bool {
        self.unfinished.load(Ordering::Acquire) <= 0
    }

    /// `true` if the job ran to completion without panicking and all of its
    /// children did too.
    pub fn is_done(&self) -> bool {
        self.unfinished.load(Ordering::Acquire) == 0
    }

    /// `true` if the job's body panicked. The counter is left at a negative
    /// value as the failure marker; the exact magnitude carries no meaning.
    pub fn is_failed(&self) -> bool {
        self.unfinished.load(Ordering::Acquire) < 0
    }

    /// Number of outstanding children plus one for the job's own body, as of
    /// this call. Exposed mainly for tests exercising the fan-out counter
    /// directly.
    pub fn outstanding(&self) -> i64 {
        self.unfinished.load(Ordering::Acquire)
    }

    pub(crate) fn take_body(&self) -> Option<JobBody> {
        self.body.lock().expect("job body mutex poisoned").take()
    }

    /// Mark this job's own body as failed. Called by the worker loop when a
    /// job's closure panics; the counter is left negative as a sentinel
    /// rather than reaching zero, so `is_done` never reports success.
    pub(crate) fn mark_body_failed(&self) {
        self.unfinished.store(-1, Ordering::SeqCst);
    }

    /// Retire one unit of outstanding work (the job's own body, or one of
    /// its children). Returns the counter value after decrementing.
    pub(crate) fn retire_one(&self) -> i64 {
        self.unfinished.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Register one more unit of outstanding work, used when a child job is
    /// created under this job.
    pub(crate) fn add_outstanding(&self) {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tunables for a [`JobManager`].
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Number of worker threads to spawn. Defaults to
    /// `available_parallelism() - 1`, floored at 1.
    pub worker_count: usize,
    /// Capacity of each worker's local ring queue. Must be a power of two.
    pub worker_queue_capacity: usize,
    /// How long an idle worker sleeps before checking its termination flag
    /// and retrying a steal. Bounds shutdown latency.
    pub idle_sleep: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            worker_count: cpus.saturating_sub(1).max(1),
            worker_queue_capacity: 1024,
            idle_sleep: Duration::from_millis(300),
        }
    }
}

/// Errors raised by [`JobManager`] construction or scheduling.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// `worker_count` was zero.
    #[error("job manager needs at least one worker")]
    NoWorkers,
    /// `worker_queue_capacity` was not a valid ring queue capacity.
    #[error("invalid worker queue capacity: {0}")]
    InvalidQueueCapacity(#[from] tapecore_ring::RingError),
}
