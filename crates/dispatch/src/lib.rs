#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Routes envelopes off a durable [`tapecore_queue::TaskQueue`] to handlers
//! registered for their task type, running each invocation as a job on a
//! [`tapecore_jobs::JobManager`].
//!
//! Handlers are typically `async fn`s doing I/O; jobs are plain synchronous
//! closures. The pump bridges the two by driving each handler's future to
//! completion with `tokio::runtime::Handle::block_on` from inside the job
//! closure, so the worker pool stays runtime-agnostic while handlers stay
//! ordinary `async fn`s.

mod api;
mod dispatcher;
mod registry;

pub use api::{DispatchContext, DispatchError, TaskHandlerSet};
pub use dispatcher::Dispatcher;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tapecore_jobs::{JobManager, JobManagerConfig};
    use tapecore_queue::LocalTaskQueue;
    use tapecore_task::Task;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Ping {
        n: u32,
    }
    impl Task for Ping {
        const TYPE_NAME: &'static str = "Ping";
    }

    async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !check() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    #[tokio::test]
    async fn posted_task_is_dispatched_to_its_handler() {
        let queue = Arc::new(LocalTaskQueue::new());
        let jobs = JobManager::new(JobManagerConfig {
            worker_count: 2,
            ..Default::default()
        })
        .unwrap();
        let dispatcher = Dispatcher::new(queue, jobs.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        dispatcher.register_task_handler_callback(move |task: Ping, _envelope, _ctx| {
            let seen = seen_clone.clone();
            async move {
                seen.fetch_add(task.n as usize, Ordering::SeqCst);
                Ok(())
            }
        });
        dispatcher.start();

        dispatcher.post_task(Ping { n: 5 }).await.unwrap();
        dispatcher.post_task(Ping { n: 7 }).await.unwrap();

        assert!(wait_until(|| seen.load(Ordering::SeqCst) == 12, Duration::from_secs(3)).await);

        dispatcher.terminate();
        jobs.join(Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn task_with_no_registered_handler_is_dropped_without_panicking() {
        let queue = Arc::new(LocalTaskQueue::new());
        let jobs = JobManager::new(JobManagerConfig {
            worker_count: 1,
            ..Default::default()
        })
        .unwrap();
        let dispatcher = Dispatcher::new(queue, jobs.clone());
        dispatcher.start();

        dispatcher.post_task(Ping { n: 1 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        dispatcher.terminate();
        jobs.join(Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn handler_can_post_a_follow_up_task_via_dispatch_context() {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        struct Pong {
            n: u32,
        }
        impl Task for Pong {
            const TYPE_NAME: &'static str = "Pong";
        }

        let queue = Arc::new(LocalTaskQueue::new());
        let jobs = JobManager::new(JobManagerConfig {
            worker_count: 2,
            ..Default::default()
        })
        .unwrap();
        let dispatcher = Dispatcher::new(queue, jobs.clone());

        let pong_seen = Arc::new(AtomicUsize::new(0));
        let pong_seen_clone = pong_seen.clone();
        dispatcher.register_task_handler_callback(move |task: Pong, _envelope, _ctx| {
            let pong_seen = pong_seen_clone.clone();
            async move {
                pong_seen.fetch_add(task.n as usize, Ordering::SeqCst);
                Ok(())
            }
        });
        dispatcher.register_task_handler_callback(|task: Ping, _envelope, ctx: DispatchContext| async move {
            ctx.post_task(Pong { n: task.n * 2 }).await.unwrap();
            Ok(())
        });
        dispatcher.start();

        dispatcher.post_task(Ping { n: 3 }).await.unwrap();
        assert!(wait_until(|| pong_seen.load(Ordering::SeqCst) == 6, Duration::from_secs(3)).await);

        dispatcher.terminate();
        jobs.join(Some(Duration::from_secs(1)));
    }
}
