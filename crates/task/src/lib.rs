#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Shared task/result types, wire format, and the blob-store interface used
//! across the `tapecore` workspace.
//!
//! A concrete task is any type implementing [`Task`]. The dispatcher and
//! durable queue never see concrete task types directly — they move
//! [`TaskEnvelope`]s, a type-erased, self-describing JSON record.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// A typed, serialisable unit of work.
///
/// `TYPE_NAME` is the wire schema discriminator (`__type__`); it must be
/// stable across releases since it is persisted in the durable queue.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable schema discriminator for this task type.
    const TYPE_NAME: &'static str;
}

/// Errors encoding/decoding a task into/out of its wire envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The task's fields failed to (de)serialize as JSON.
    #[error("task payload (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// A task's JSON representation must be an object so its fields can be
    /// flattened alongside `__type__`/`id` on the wire.
    #[error("task payload for type {0:?} was not a JSON object")]
    NotAnObject(String),
}

/// A type-erased, self-describing task record.
///
/// On the wire this is a single JSON object: `{"__type__": ..., "id": ...,
/// <task fields>}` — the task's own fields are flattened alongside the
/// discriminator and id rather than nested under a `payload` key, matching
/// the schema in spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEnvelope {
    /// Fresh unique id assigned when the task was posted.
    pub id: Uuid,
    /// Schema discriminator (`Task::TYPE_NAME`).
    pub type_name: String,
    /// The task's own fields, as a JSON object.
    pub payload: serde_json::Value,
}

impl TaskEnvelope {
    /// Wrap a concrete task in a fresh envelope with a new id.
    pub fn encode<T: Task>(task: &T) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_value(task)?;
        if !payload.is_object() {
            return Err(EnvelopeError::NotAnObject(T::TYPE_NAME.to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            type_name: T::TYPE_NAME.to_string(),
            payload,
        })
    }

    /// Decode the envelope's payload back into a concrete task type.
    ///
    /// Callers are expected to check [`Self::is_type`] (or look the
    /// envelope up by `type_name` in a handler registry) before calling
    /// this — it does not itself verify `type_name` matches `T`.
    pub fn decode<T: Task>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Whether this envelope's discriminator matches `T::TYPE_NAME`.
    pub fn is_type<T: Task>(&self) -> bool {
        self.type_name == T::TYPE_NAME
    }
}

impl Serialize for TaskEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let fields = self
            .payload
            .as_object()
            .ok_or_else(|| serde::ser::Error::custom("task envelope payload must be a JSON object"))?;

        let mut map = serializer.serialize_map(Some(fields.len() + 2))?;
        map.serialize_entry("__type__", &self.type_name)?;
        map.serialize_entry("id", &self.id)?;
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TaskEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut fields = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;

        let type_name = fields
            .remove("__type__")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| serde::de::Error::missing_field("__type__"))?;

        let id = fields
            .remove("id")
            .ok_or_else(|| serde::de::Error::missing_field("id"))
            .and_then(|v| serde_json::from_value(v).map_err(serde::de::Error::custom))?;

        Ok(Self {
            id,
            type_name,
            payload: serde_json::Value::Object(fields),
        })
    }
}

/// Outcome of a task, reported back by posting a new `TaskResult` task.
///
/// `TaskResult` is itself a [`Task`] (`TYPE_NAME = "TaskResult"`) so it
/// flows through the same post/fetch/dispatch path as any other task —
/// Rust has no subclassing, so the "distinguished subclass" from spec.md §3
/// becomes a plain struct that also implements `Task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The envelope of the task this result reports on.
    pub task: TaskEnvelope,
    /// Whether the task failed.
    pub is_failed: bool,
    /// Human-readable failure reason, present when `is_failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Handler-specific result fields, flattened alongside the fields above.
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl Task for TaskResult {
    const TYPE_NAME: &'static str = "TaskResult";
}

impl TaskResult {
    /// Build a successful result carrying `payload` (must serialize to a
    /// JSON object, or `Value::Null`/`Value::Object` for no extra fields).
    pub fn success(task: TaskEnvelope, payload: serde_json::Value) -> Self {
        Self {
            task,
            is_failed: false,
            failure_reason: None,
            payload: normalize_payload(payload),
        }
    }

    /// Build a failed result with a human-readable reason.
    pub fn failure(task: TaskEnvelope, reason: impl Into<String>) -> Self {
        Self {
            task,
            is_failed: true,
            failure_reason: Some(reason.into()),
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    /// The id of the task this result reports on.
    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    /// Decode this result's extra fields into a concrete result payload
    /// type (e.g. `{ target_blob_id: Option<String> }`).
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

fn normalize_payload(payload: serde_json::Value) -> serde_json::Value {
    match payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    }
}

/// Errors from a [`BlobStore`] operation.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No blob exists with the given id.
    #[error("blob {0:?} not found")]
    NotFound(String),
    /// Underlying I/O failure.
    #[error("blob store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract large-payload store. The core never inspects blob bytes — it
/// only stores, opens, and materializes them as a tempfile for handlers
/// that shell out to external tools (e.g. a transcoder).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a fresh id derived from `name`, returning that
    /// id.
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<String, BlobError>;

    /// Open a previously stored blob for reading.
    async fn open(&self, id: &str) -> Result<Box<dyn tokio::io::AsyncRead + Unpin + Send>, BlobError>;

    /// Materialize a blob as a standalone temp file, for handlers that need
    /// a real path on disk (e.g. to hand to a subprocess).
    async fn as_tempfile(&self, id: &str, suffix: &str) -> Result<tempfile::TempPath, BlobError>;
}

/// Filesystem-backed [`BlobStore`], for tests and single-node deployments.
///
/// Writes go through a temp file + rename within `root`, the same
/// write-then-atomically-publish pattern used for the worker engine's
/// resume-state file.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Store blobs under `root`, creating it on first write if needed.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<String, BlobError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let id = format!("{}-{name}", Uuid::new_v4());
        let final_path = self.path_for(&id);
        let tmp_path = final_path.with_extension("tmp");

        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(id)
    }

    async fn open(&self, id: &str) -> Result<Box<dyn tokio::io::AsyncRead + Unpin + Send>, BlobError> {
        let path = self.path_for(id);
        let file = tokio::fs::File::open(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(id.to_string())
            } else {
                BlobError::Io(err)
            }
        })?;
        Ok(Box::new(file))
    }

    async fn as_tempfile(&self, id: &str, suffix: &str) -> Result<tempfile::TempPath, BlobError> {
        let path = self.path_for(id);
        let id = id.to_string();
        let suffix = suffix.to_string();

        tokio::task::spawn_blocking(move || -> Result<tempfile::TempPath, BlobError> {
            use std::io::Write as _;

            let bytes = std::fs::read(&path).map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    BlobError::NotFound(id.clone())
                } else {
                    BlobError::Io(err)
                }
            })?;

            let mut tmp = tempfile::Builder::new().suffix(&suffix).tempfile()?;
            tmp.write_all(&bytes)?;
            Ok(tmp.into_temp_path())
        })
        .await
        .map_err(|join_err| BlobError::Io(std::io::Error::other(join_err)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Echo {
        msg: String,
    }

    impl Task for Echo {
        const TYPE_NAME: &'static str = "Echo";
    }

    #[test]
    fn envelope_round_trips_and_flattens_fields() {
        let task = Echo { msg: "hi".into() };
        let envelope = TaskEnvelope::encode(&task).unwrap();
        assert!(envelope.is_type::<Echo>());

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["__type__"], "Echo");
        assert_eq!(wire["msg"], "hi");
        assert!(wire.get("id").is_some());

        let back: TaskEnvelope = serde_json::from_value(wire).unwrap();
        assert_eq!(back.id, envelope.id);
        let decoded: Echo = back.decode().unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn task_result_wraps_originating_envelope() {
        let task = Echo { msg: "hi".into() };
        let envelope = TaskEnvelope::encode(&task).unwrap();
        let result = TaskResult::success(
            envelope.clone(),
            serde_json::json!({ "echoed": "hi" }),
        );
        assert_eq!(result.task_id(), envelope.id);
        assert!(!result.is_failed);

        let result_envelope = TaskEnvelope::encode(&result).unwrap();
        assert!(result_envelope.is_type::<TaskResult>());
        let decoded: TaskResult = result_envelope.decode().unwrap();
        assert_eq!(decoded.task_id(), envelope.id);
        assert_eq!(decoded.payload["echoed"], "hi");
    }

    #[test]
    fn task_result_failure_has_no_payload_fields() {
        let task = Echo { msg: "hi".into() };
        let envelope = TaskEnvelope::encode(&task).unwrap();
        let result = TaskResult::failure(envelope, "boom");
        assert!(result.is_failed);
        assert_eq!(result.failure_reason.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn filesystem_blob_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());

        let id = store.store("clip.wav", b"abc123").await.unwrap();

        let mut reader = store.open(&id).await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"abc123");

        let tempfile_path = store.as_tempfile(&id, ".wav").await.unwrap();
        let on_disk = std::fs::read(&tempfile_path).unwrap();
        assert_eq!(on_disk, b"abc123");
    }

    #[tokio::test]
    async fn filesystem_blob_store_missing_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        let result = store.open("nope").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }
}
