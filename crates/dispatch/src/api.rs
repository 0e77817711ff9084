//! Public types: dispatch context, errors, and the handler-set trait.

use std::sync::Arc;

use futures::future::BoxFuture;
use tapecore_task::Task;

use crate::Dispatcher;

/// A handler's view of the dispatcher: enough to post follow-up tasks
/// (including result tasks) and reach the job manager for child fan-out.
#[derive(Clone)]
pub struct DispatchContext {
    pub(crate) dispatcher: Dispatcher,
}

impl DispatchContext {
    /// The job manager backing this dispatcher's worker pool.
    pub fn jobs(&self) -> &tapecore_jobs::JobManager {
        self.dispatcher.jobs()
    }

    /// Post a follow-up task (e.g. a `TaskResult`) through the same
    /// dispatcher, assigning it a fresh id.
    pub async fn post_task<T: Task>(&self, task: T) -> Result<uuid::Uuid, DispatchError> {
        self.dispatcher.post_task(task).await
    }
}

/// A type-erased handler: decode the envelope, run the handler, report
/// success/failure. Built by [`crate::Dispatcher::register_task_handler_callback`].
pub(crate) type HandlerFn =
    Arc<dyn Fn(tapecore_task::TaskEnvelope, DispatchContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Implemented once by a struct grouping several related handler methods,
/// the way `tasks/audio_convert.py`'s `@task_handler(...)`-decorated methods
/// are grouped on one class. `register` is called once at startup and wires
/// each method to the task type(s) it handles via
/// [`crate::Dispatcher::register_task_handler_callback`].
pub trait TaskHandlerSet: Send + Sync + 'static {
    /// Register this handler set's methods against `dispatcher`.
    fn register(self: Arc<Self>, dispatcher: &Dispatcher);
}

/// Errors raised by [`crate::Dispatcher`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The task failed to encode into its wire envelope.
    #[error("failed to encode task: {0}")]
    Encode(#[from] tapecore_task::EnvelopeError),
    /// The durable queue rejected the operation.
    #[error("task queue error: {0}")]
    Queue(#[from] tapecore_queue::QueueError),
}
