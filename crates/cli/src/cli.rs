use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Fixture handler set to register against the dispatcher, for manual
/// smoke-testing the core without a real external producer attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoMode {
    /// Post one `Echo` task and log its result.
    Echo,
    /// Post one `Batch` task, fanning out child jobs across the pool.
    Batch,
    /// Register the `ConvertAudio` handler; does not post a task on its own
    /// since it needs a source blob id to act on.
    Convert,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "tapecore", version, about = "Durable task-queue worker")]
pub struct Cli {
    /// Redis connection URL for the durable task queue. When omitted, the
    /// worker falls back to an in-process queue whose state is lost on
    /// restart — fine for `--demo` runs, not for production.
    #[arg(long, env = "TAPECORE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Redis list key shared by every producer/consumer.
    #[arg(long, env = "TAPECORE_QUEUE_KEY")]
    pub queue_key: Option<String>,

    /// Number of worker threads in the job pool. Defaults to
    /// `available_parallelism() - 1`, floored at 1.
    #[arg(long, env = "TAPECORE_WORKERS")]
    pub workers: Option<usize>,

    /// Root directory for the filesystem blob store.
    #[arg(long, env = "TAPECORE_BLOB_ROOT")]
    pub blob_root: Option<PathBuf>,

    /// Path to an operator-edited TOML config file. CLI flags above
    /// override the values it sets, field by field.
    #[arg(long, env = "TAPECORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Register a fixture handler set and (for `echo`/`batch`) post one
    /// demo task instead of waiting for external producers.
    #[arg(long, value_enum)]
    pub demo: Option<DemoMode>,
}
