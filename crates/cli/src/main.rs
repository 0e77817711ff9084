mod cli;
mod config;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tapecore_dispatch::Dispatcher;
use tapecore_handlers::{Batch, ConvertAudioHandler, DemoHandlers, Echo};
use tapecore_jobs::{JobManager, JobManagerConfig};
use tapecore_queue::{LocalTaskQueue, RedisQueueConfig, RedisTaskQueue, TaskQueue};
use tapecore_task::FilesystemBlobStore;
use tapecore_workflow::WorkflowManager;

use crate::cli::{Cli, DemoMode};
use crate::config::ResolvedConfig;
use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ResolvedConfig::resolve(&cli)?;

    let queue: Arc<dyn TaskQueue> = match &config.redis_url {
        Some(url) => {
            tracing::info!(queue_key = %config.queue_key, "connecting to redis task queue");
            let redis_config = RedisQueueConfig::new(url.clone(), config.queue_key.clone());
            Arc::new(RedisTaskQueue::connect(redis_config).await?)
        }
        None => {
            tracing::warn!("no --redis-url configured, using an in-process queue (state is lost on restart)");
            Arc::new(LocalTaskQueue::new())
        }
    };

    let jobs = JobManager::new(JobManagerConfig {
        worker_count: config.workers,
        ..Default::default()
    })?;
    let dispatcher = Dispatcher::new(queue, jobs.clone());

    let blobs: Arc<FilesystemBlobStore> = Arc::new(FilesystemBlobStore::new(&config.blob_root));

    dispatcher.register_task_handler(DemoHandlers::new());
    dispatcher.register_task_handler(ConvertAudioHandler::new(blobs, config.workers.max(1)));

    let workflows = WorkflowManager::new(0);
    dispatcher.register_task_handler(Arc::new(workflows));

    dispatcher.start();
    tracing::info!(
        workers = config.workers,
        queue_key = %config.queue_key,
        blob_root = %config.blob_root.display(),
        "tapecore worker started"
    );

    if let Some(demo) = cli.demo {
        run_demo(demo, &dispatcher).await?;
    }

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut immediate_exit = false;
    match shutdown_rx.recv().await {
        Some(ShutdownEvent::Graceful) => {
            tracing::info!("stop requested, finishing in-flight jobs (press Ctrl+C again to exit immediately)");
            dispatcher.terminate();

            let join_jobs = jobs.clone();
            let mut join_handle = tokio::task::spawn_blocking(move || join_jobs.join(Some(Duration::from_secs(5))));

            tokio::select! {
                _ = &mut join_handle => {}
                ev = shutdown_rx.recv() => {
                    if matches!(ev, Some(ShutdownEvent::Immediate)) {
                        tracing::warn!("stop requested again, exiting immediately");
                        join_handle.abort();
                        immediate_exit = true;
                    }
                }
            }
        }
        Some(ShutdownEvent::Immediate) => {
            tracing::warn!("stop requested, exiting immediately");
            dispatcher.terminate();
            immediate_exit = true;
        }
        None => {
            dispatcher.terminate();
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    Ok(())
}

async fn run_demo(mode: DemoMode, dispatcher: &Dispatcher) -> anyhow::Result<()> {
    match mode {
        DemoMode::Echo => {
            let id = dispatcher.post_task(Echo { msg: "hello from tapecore --demo echo".into() }).await?;
            tracing::info!(task_id = %id, "posted demo echo task");
        }
        DemoMode::Batch => {
            let id = dispatcher.post_task(Batch { n: 8 }).await?;
            tracing::info!(task_id = %id, "posted demo batch task");
        }
        DemoMode::Convert => {
            tracing::info!(
                "convert audio handler registered; post a ConvertAudio task against a real blob id to exercise it"
            );
        }
    }
    Ok(())
}
