//! Operator-edited `WorkerConfig` file, loaded as TOML and merged with CLI
//! flags. Unlike the teacher's `SubmitterConfig` (auto-discovered under
//! `XDG_CONFIG_HOME`, written by the program itself), this file is pointed
//! to explicitly via `--config`/`TAPECORE_CONFIG` and is never written back —
//! it's something an operator hand-edits ahead of time, not state the binary
//! persists across runs.

use std::path::PathBuf;

use serde::Deserialize;

use crate::cli::Cli;

const DEFAULT_QUEUE_KEY: &str = "tapecore:tasks";
const DEFAULT_BLOB_ROOT: &str = "./tapecore-blobs";

/// On-disk shape of the TOML config file. Every field is optional so a
/// config only needs to set what it wants to override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub queue_key: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub blob_root: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("failed to read config file {}: {err}", path.display()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("failed to parse config file {}: {err}", path.display()))?;
        Ok(cfg)
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// CLI flags merged over an optional config file, with hardcoded defaults
/// as the final fallback. CLI flags always win; a config file value is used
/// only where the corresponding flag was left unset.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub redis_url: Option<String>,
    pub queue_key: String,
    pub workers: usize,
    pub blob_root: PathBuf,
}

impl ResolvedConfig {
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => WorkerConfig::load(path)?,
            None => WorkerConfig::default(),
        };

        Ok(Self {
            redis_url: cli.redis_url.clone().or(file.redis_url),
            queue_key: cli
                .queue_key
                .clone()
                .or(file.queue_key)
                .unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            workers: cli.workers.or(file.workers).unwrap_or_else(default_worker_count),
            blob_root: cli
                .blob_root
                .clone()
                .or(file.blob_root)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_ROOT)),
        })
    }
}
