//! The per-thread run loop: pop from the worker's own queue, steal one job
//! from a random peer if empty, else sleep until the next poll.

use crate::manager::JobManager;

pub(crate) fn run(manager: JobManager, worker_idx: usize) {
    tracing::debug!(worker_idx, "worker starting");

    while !manager.should_terminate(worker_idx) {
        match manager.get_job_as_worker(worker_idx) {
            Some(job) => manager.run_job(&job),
            None => std::thread::sleep(manager.idle_sleep()),
        }
    }

    tracing::debug!(worker_idx, "worker stopped");
}
