use async_trait::async_trait;
use redis::AsyncCommands;
use tapecore_task::TaskEnvelope;
use uuid::Uuid;

use crate::{decode_record, encode_record, QueueError, TaskQueue};

/// Connection settings for [`RedisTaskQueue`].
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// The single list key every producer/consumer shares.
    pub list_key: String,
}

impl RedisQueueConfig {
    /// Build a config pointing at `url`, using `list_key` as the queue's
    /// list.
    pub fn new(url: impl Into<String>, list_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            list_key: list_key.into(),
        }
    }
}

/// Durable queue backed by a single Redis list key.
///
/// Per spec.md §7 and §9, no transaction wrapper is used: `LPUSH`/`LPOP`
/// are already atomic on their own for a single key, so the connection is
/// held as one shared, auto-reconnecting [`redis::aio::ConnectionManager`]
/// rather than opened per call.
pub struct RedisTaskQueue {
    conn: redis::aio::ConnectionManager,
    list_key: String,
}

impl RedisTaskQueue {
    /// Connect to the backend described by `config`.
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            list_key: config.list_key,
        })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn put(&self, envelope: TaskEnvelope) -> Result<Uuid, QueueError> {
        let id = envelope.id;
        let raw = encode_record(&envelope)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.list_key, raw).await?;
        Ok(id)
    }

    async fn fetch(&self) -> Result<Option<TaskEnvelope>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(&self.list_key, None).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match decode_record(&raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => {
                tracing::error!(error = %err, "dropping malformed task queue record");
                Ok(None)
            }
        }
    }
}
