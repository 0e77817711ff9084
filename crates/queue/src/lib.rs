#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Durable task queue: a FIFO-ish list persisted in an external key-value
//! store, shared by every worker process.
//!
//! The contract is intentionally loose — pop-is-delete, at-most-once per
//! queue pop, best-effort ordering — matching an append/destructive-pop pair
//! on a single list key rather than a real message broker.

mod local;
mod redis_queue;

pub use local::LocalTaskQueue;
pub use redis_queue::{RedisQueueConfig, RedisTaskQueue};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use tapecore_task::TaskEnvelope;
use uuid::Uuid;

/// Errors raised while enqueuing or fetching from a [`TaskQueue`].
///
/// Per spec, the durable queue never surfaces partial failures to
/// producers: a record that fails to deserialize on the way out is logged
/// and dropped, not returned as an error. Only backing-store connection
/// failures propagate.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing store connection failed or returned an error reply.
    #[error("task queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
    /// A record failed to encode on the way in. Decode failures on the way
    /// out are logged and skipped rather than surfaced here — see
    /// [`TaskQueue::fetch`].
    #[error("task queue record (de)serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A durable, cross-process FIFO of [`TaskEnvelope`]s.
///
/// Implementations must be cheap to clone/share (an `Arc` around a
/// connection handle, typically) since both the dispatcher pump and any
/// producer threads hold one.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue `envelope`, returning its id.
    async fn put(&self, envelope: TaskEnvelope) -> Result<Uuid, QueueError>;

    /// Pop the next available envelope, or `None` if the queue is empty.
    ///
    /// A record that fails to decode is logged and skipped rather than
    /// returned as an error, so a single corrupt entry cannot wedge the
    /// dispatcher pump.
    async fn fetch(&self) -> Result<Option<TaskEnvelope>, QueueError>;
}

#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct QueueRecord {
    pub(crate) id: Uuid,
    pub(crate) payload: String,
}

pub(crate) fn encode_record(envelope: &TaskEnvelope) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(envelope)?;
    let record = QueueRecord {
        id: envelope.id,
        payload: B64.encode(json),
    };
    serde_json::to_string(&record)
}

pub(crate) fn decode_record(raw: &str) -> Result<TaskEnvelope, serde_json::Error> {
    let record: QueueRecord = serde_json::from_str(raw)?;
    let json = B64.decode(&record.payload).map_err(serde::de::Error::custom)?;
    serde_json::from_slice(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapecore_task::Task;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Echo {
        msg: String,
    }
    impl Task for Echo {
        const TYPE_NAME: &'static str = "Echo";
    }

    #[test]
    fn record_round_trips_through_base64_json_envelope() {
        let envelope = TaskEnvelope::encode(&Echo { msg: "hi".into() }).unwrap();
        let raw = encode_record(&envelope).unwrap();
        let decoded = decode_record(&raw).unwrap();
        assert_eq!(decoded.id, envelope.id);
        let echo: Echo = decoded.decode().unwrap();
        assert_eq!(echo.msg, "hi");
    }

    #[test]
    fn malformed_record_fails_to_decode_without_panicking() {
        assert!(decode_record("not json").is_err());
        assert!(decode_record(r#"{"id":"not-a-uuid","payload":"eyJ9"}"#).is_err());
    }
}
