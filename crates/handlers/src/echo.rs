//! `Echo`/`Batch`: stand-ins exercising the dispatcher and job pool without
//! any real I/O, grounded on the shape of `tasks/audio_convert.py`'s
//! handlers but stripped to their fan-out/result-posting skeleton.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tapecore_dispatch::{DispatchContext, Dispatcher, TaskHandlerSet};
use tapecore_task::{Task, TaskEnvelope, TaskResult};

/// Round-trips `msg` back through a [`TaskResult`] as [`EchoResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Echo {
    /// The message to echo back.
    pub msg: String,
}

impl Task for Echo {
    const TYPE_NAME: &'static str = "Echo";
}

/// Payload shape carried in the [`TaskResult`] posted for an [`Echo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoResult {
    /// The echoed message.
    pub echoed: String,
}

/// Spawns `n` short-lived child jobs and waits for all of them, exercising
/// the worker pool's fan-out and wait-helps-progress behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Number of 100ms child jobs to run.
    pub n: u32,
}

impl Task for Batch {
    const TYPE_NAME: &'static str = "Batch";
}

/// Groups the [`Echo`] and [`Batch`] handlers, the way
/// `AudioConverterHandler` groups its `@task_handler`-decorated methods on
/// one class.
pub struct DemoHandlers;

impl DemoHandlers {
    /// Build a new handler set. Stateless: both handlers close over
    /// nothing but the dispatch context they're given per call.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    async fn echo(&self, task: Echo, envelope: TaskEnvelope, ctx: DispatchContext) -> anyhow::Result<()> {
        let payload = serde_json::to_value(EchoResult { echoed: task.msg })?;
        ctx.post_task(TaskResult::success(envelope, payload)).await?;
        Ok(())
    }

    async fn batch(&self, task: Batch, envelope: TaskEnvelope, ctx: DispatchContext) -> anyhow::Result<()> {
        let jobs = ctx.jobs().clone();
        let children: Vec<_> = (0..task.n)
            .map(|_| jobs.spawn_job(|_job_ctx| std::thread::sleep(Duration::from_millis(100))))
            .collect();

        for child in &children {
            jobs.wait(child);
        }

        let payload = serde_json::json!({ "completed": task.n });
        ctx.post_task(TaskResult::success(envelope, payload)).await?;
        Ok(())
    }
}

impl TaskHandlerSet for DemoHandlers {
    fn register(self: Arc<Self>, dispatcher: &Dispatcher) {
        let echo_handlers = self.clone();
        dispatcher.register_task_handler_callback(move |task: Echo, envelope, ctx| {
            let handlers = echo_handlers.clone();
            async move { handlers.echo(task, envelope, ctx).await }
        });

        let batch_handlers = self.clone();
        dispatcher.register_task_handler_callback(move |task: Batch, envelope, ctx| {
            let handlers = batch_handlers.clone();
            async move { handlers.batch(task, envelope, ctx).await }
        });
    }
}
