use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tapecore_ring::RingQueue;

use crate::api::{Job, JobBody, JobContext, JobError, JobManagerConfig};

struct WorkerSlot {
    queue: RingQueue<Arc<Job>>,
    terminate: AtomicBool,
}

struct ManagerInner {
    workers: Vec<WorkerSlot>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    config: JobManagerConfig,
    next_id: AtomicU64,
}

/// A pool of worker threads plus the cooperative scheduling state (per-worker
/// ring queues, job fan-out counters) needed to run [`Job`]s with work
/// stealing.
///
/// Cloning a `JobManager` is cheap; every clone shares the same pool.
#[derive(Clone)]
pub struct JobManager(Arc<ManagerInner>);

impl JobManager {
    /// Spawn a pool of worker threads per `config`.
    pub fn new(config: JobManagerConfig) -> Result<Self, JobError> {
        if config.worker_count == 0 {
            return Err(JobError::NoWorkers);
        }

        let mut workers = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count {
            workers.push(WorkerSlot {
                queue: RingQueue::try_new(config.worker_queue_capacity)?,
                terminate: AtomicBool::new(false),
            });
        }

        let inner = Arc::new(ManagerInner {
            workers,
            handles: Mutex::new(Vec::new()),
            config,
            next_id: AtomicU64::new(1),
        });
        let manager = JobManager(inner);

        let mut handles = Vec::with_capacity(manager.0.workers.len());
        for idx in 0..manager.0.workers.len() {
            let worker_manager = manager.clone();
            let handle = thread::Builder::new()
                .name(format!("tapecore-worker-{idx}"))
                .spawn(move || crate::worker::run(worker_manager, idx))
                .expect("failed to spawn tapecore worker thread");
            handles.push(handle);
        }
        *manager.0.handles.lock().expect("job manager handles poisoned") = handles;

        Ok(manager)
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.0.workers.len()
    }

    /// Wrap `body` as a top-level job with no parent. The job is not run
    /// until [`JobManager::schedule_job`] is called with it.
    pub fn create_job<F>(&self, body: F) -> Arc<Job>
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        Arc::new(Job {
            id: self.0.next_id.fetch_add(1, Ordering::Relaxed),
            unfinished: std::sync::atomic::AtomicI64::new(1),
            parent: None,
            body: Mutex::new(Some(Box::new(body) as JobBody)),
        })
    }

    /// Wrap `body` as a job that counts against `parent`'s outstanding work,
    /// so `wait`ing on `parent` also waits for this job.
    pub fn create_child_job<F>(&self, parent: &Arc<Job>, body: F) -> Arc<Job>
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        parent.add_outstanding();
        Arc::new(Job {
            id: self.0.next_id.fetch_add(1, Ordering::Relaxed),
            unfinished: std::sync::atomic::AtomicI64::new(1),
            parent: Some(parent.clone()),
            body: Mutex::new(Some(Box::new(body) as JobBody)),
        })
    }

    /// Hand `job` to a randomly chosen worker's queue. Retries against other
    /// workers if the chosen one is momentarily full.
    pub fn schedule_job(&self, job: Arc<Job>) {
        let workers = &self.0.workers;
        if workers.is_empty() {
            return;
        }
        let mut item = job;
        loop {
            let idx = rand::thread_rng().gen_range(0..workers.len());
            match workers[idx].queue.push(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    thread::yield_now();
                }
            }
        }
    }

    /// Create and immediately schedule a top-level job, returning its
    /// handle.
    pub fn spawn_job<F>(&self, body: F) -> Arc<Job>
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        let job = self.create_job(body);
        self.schedule_job(job.clone());
        job
    }

    /// Block the calling thread until `job` (and every descendant fanned out
    /// from it) has settled.
    ///
    /// While waiting, the calling thread becomes a helper: it repeatedly
    /// pulls and runs any other job it can find from the pool, rather than
    /// sitting idle. This holds whether or not the caller happens to be one
    /// of the pool's own worker threads.
    pub fn wait(&self, job: &Arc<Job>) {
        while !job.is_settled() {
            match self.steal_any() {
                Some(runnable) => self.run_job(&runnable),
                None => thread::yield_now(),
            }
        }
    }

    /// Signal every worker to stop after its current job, then join all
    /// worker threads. `timeout` bounds how long this call will wait; if it
    /// elapses first, the threads are left running and `false` is returned.
    pub fn join(&self, timeout: Option<Duration>) -> bool {
        for worker in &self.0.workers {
            worker.terminate.store(true, Ordering::Release);
        }

        let handles = std::mem::take(&mut *self.0.handles.lock().expect("job manager handles poisoned"));
        match timeout {
            None => {
                for handle in handles {
                    let _ = handle.join();
                }
                true
            }
            Some(timeout) => {
                let (tx, rx) = std::sync::mpsc::channel();
                thread::spawn(move || {
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let _ = tx.send(());
                });
                rx.recv_timeout(timeout).is_ok()
            }
        }
    }

    pub(crate) fn idle_sleep(&self) -> Duration {
        self.0.config.idle_sleep
    }

    pub(crate) fn should_terminate(&self, worker_idx: usize) -> bool {
        self.0.workers[worker_idx].terminate.load(Ordering::Acquire)
    }

    /// Mirrors the manager's worker-local scheduling: the calling worker's
    /// own queue first, falling back to one random peer. Used by the
    /// worker's run loop.
    pub(crate) fn get_job_as_worker(&self, worker_idx: usize) -> Option<Arc<Job>> {
        let workers = &self.0.workers;
        if let Some(job) = workers[worker_idx].queue.pop() {
            return Some(job);
        }
        if workers.len() <= 1 {
            return None;
        }
        let peer = rand::thread_rng().gen_range(0..workers.len());
        if peer == worker_idx {
            return None;
        }
        workers[peer].queue.pop()
    }

    /// Full round-robin sweep over every worker's queue, starting from a
    /// random offset. Used by callers that are not themselves a registered
    /// worker thread (or that want a harder effort than a single steal
    /// attempt), such as [`JobManager::wait`].
    fn steal_any(&self) -> Option<Arc<Job>> {
        let workers = &self.0.workers;
        let n = workers.len();
        if n == 0 {
            return None;
        }
        let start = rand::thread_rng().gen_range(0..n);
        (0..n)
            .map(|offset| (start + offset) % n)
            .find_map(|idx| workers[idx].queue.pop())
    }

    /// Run a job to completion inline on the calling thread, updating its
    /// own and its parent's fan-out counters. Used by both the worker loop
    /// and `wait`'s cooperative helper path.
    pub(crate) fn run_job(&self, job: &Arc<Job>) {
        let Some(body) = job.take_body() else {
            return;
        };
        let ctx = JobContext {
            job: job.clone(),
            manager: self.clone(),
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| body(ctx)));
        if let Err(panic) = outcome {
            tracing::error!(job_id = job.id(), panic = %panic_message(&panic), "job panicked");
            job.mark_body_failed();
        }
        job.retire_one();
        if let Some(parent) = &job.parent {
            parent.retire_one();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
