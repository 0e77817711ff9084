use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tapecore_jobs::JobManager;
use tapecore_queue::TaskQueue;
use tapecore_task::{Task, TaskEnvelope};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{DispatchContext, DispatchError, HandlerFn, TaskHandlerSet};
use crate::registry::HandlerRegistry;

/// How often the pump polls the durable queue when it finds nothing to
/// fetch. The durable queue here is non-blocking (`LPOP`-style), so "block
/// on the backing store with a short timeout" from spec.md becomes a short
/// sleep between poll attempts.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct DispatcherInner {
    queue: Arc<dyn TaskQueue>,
    jobs: JobManager,
    registry: HandlerRegistry,
    poll_interval: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Bridges the durable [`TaskQueue`] and the [`JobManager`]: a pump task
/// fetches envelopes, looks up their handlers by type, and schedules each
/// invocation as a job.
///
/// Cloning a `Dispatcher` is cheap; every clone shares the same queue,
/// pool, and handler registry.
#[derive(Clone)]
pub struct Dispatcher(Arc<DispatcherInner>);

impl Dispatcher {
    /// Build a dispatcher over `queue` and `jobs`. The pump is not running
    /// until [`Dispatcher::start`] is called.
    pub fn new(queue: Arc<dyn TaskQueue>, jobs: JobManager) -> Self {
        Self::with_poll_interval(queue, jobs, DEFAULT_POLL_INTERVAL)
    }

    /// Like [`Dispatcher::new`], overriding the empty-queue poll interval.
    pub fn with_poll_interval(queue: Arc<dyn TaskQueue>, jobs: JobManager, poll_interval: Duration) -> Self {
        Self(Arc::new(DispatcherInner {
            queue,
            jobs,
            registry: HandlerRegistry::default(),
            poll_interval,
            pump: Mutex::new(None),
        }))
    }

    /// The job manager backing this dispatcher's worker pool.
    pub fn jobs(&self) -> &JobManager {
        &self.0.jobs
    }

    /// Build a [`DispatchContext`] over this dispatcher, for code that
    /// drives it outside of a handler invocation (e.g. a workflow poll
    /// loop posting each step's task).
    pub fn context(&self) -> DispatchContext {
        DispatchContext { dispatcher: self.clone() }
    }

    /// Register a free function/closure as the handler for `T`.
    ///
    /// Multiple handlers may be registered for the same task type; all are
    /// invoked, in registration order, as independent jobs. The handler
    /// receives the decoded task alongside its own [`TaskEnvelope`], so it
    /// can build a [`tapecore_task::TaskResult`] that references the task
    /// it just ran.
    pub fn register_task_handler_callback<T, F, Fut>(&self, handler: F)
    where
        T: Task,
        F: Fn(T, TaskEnvelope, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: HandlerFn = Arc::new(move |envelope: TaskEnvelope, ctx: DispatchContext| {
            let handler = handler.clone();
            Box::pin(async move {
                let task: T = envelope.decode()?;
                handler(task, envelope, ctx).await
            }) as BoxFuture<'static, anyhow::Result<()>>
        });
        self.0.registry.register(T::TYPE_NAME, wrapped);
    }

    /// Register every handler method on `obj` via [`TaskHandlerSet::register`].
    pub fn register_task_handler<H: TaskHandlerSet>(&self, obj: Arc<H>) {
        obj.register(self);
    }

    /// Assign `task` a fresh id, wrap it in an envelope, and enqueue it on
    /// the durable queue.
    pub async fn post_task<T: Task>(&self, task: T) -> Result<Uuid, DispatchError> {
        let envelope = TaskEnvelope::encode(&task)?;
        let id = envelope.id;
        self.0.queue.put(envelope).await?;
        Ok(id)
    }

    /// Start the pump: a single `tokio` task that fetches envelopes off the
    /// queue and schedules matching handlers onto the worker pool. Calling
    /// this more than once without an intervening [`Dispatcher::terminate`]
    /// leaves the previous pump running alongside the new one.
    pub fn start(&self) {
        let inner = self.0.clone();
        let dispatcher = self.clone();
        let handle = tokio::runtime::Handle::current();
        let task = tokio::spawn(async move { pump_loop(inner, dispatcher, handle).await });
        *self.0.pump.lock().expect("dispatcher pump mutex poisoned") = Some(task);
    }

    /// Stop the pump. In-flight handler jobs already scheduled on the
    /// worker pool run to completion; only the fetch loop itself is
    /// cancelled. Posting further tasks (e.g. via [`Dispatcher::post_task`])
    /// still succeeds; they simply sit in the durable queue for another
    /// process.
    pub fn terminate(&self) {
        if let Some(task) = self.0.pump.lock().expect("dispatcher pump mutex poisoned").take() {
            task.abort();
        }
    }
}

async fn pump_loop(inner: Arc<DispatcherInner>, dispatcher: Dispatcher, runtime: tokio::runtime::Handle) {
    loop {
        let envelope = match inner.queue.fetch().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tokio::time::sleep(inner.poll_interval).await;
                continue;
            }
            Err(err) => {
                tracing::error!(error = %err, "task queue fetch failed");
                tokio::time::sleep(inner.poll_interval).await;
                continue;
            }
        };

        let handlers = inner.registry.handlers_for(&envelope.type_name);
        if handlers.is_empty() {
            tracing::warn!(task_type = %envelope.type_name, task_id = %envelope.id, "no handler registered for task type, dropping");
            continue;
        }

        for handler in handlers {
            let envelope = envelope.clone();
            let ctx = DispatchContext {
                dispatcher: dispatcher.clone(),
            };
            let runtime = runtime.clone();
            let job = inner.jobs.create_job(move |_job_ctx| {
                if let Err(err) = runtime.block_on(handler(envelope, ctx)) {
                    tracing::error!(error = %err, "task handler failed");
                }
            });
            inner.jobs.schedule_job(job);
        }
    }
}
