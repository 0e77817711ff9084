//! `ConvertAudio`: a deliberately thin stand-in for
//! `tasks/audio_convert.py`'s `AudioConverterHandler.convert_audio`. It
//! models the same admission-control re-post pattern (`in_flight > max` ⇒
//! post the task back onto the queue unchanged) but copies bytes between
//! two [`BlobStore`] slots instead of shelling out to `ffmpeg`. A real
//! transcoder handler replaces only [`ConvertAudioHandler::run_conversion`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tapecore_dispatch::{Dispatcher, TaskHandlerSet};
use tapecore_task::{BlobStore, Task, TaskEnvelope, TaskResult};

/// Convert the blob at `source_blob_id` to `target_format`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertAudio {
    /// Id of the source blob in the configured [`BlobStore`].
    pub source_blob_id: String,
    /// Target format extension (e.g. `"mp3"`); unused by the stand-in
    /// conversion, which only copies bytes, but carried so a real
    /// transcoder handler has something to act on.
    pub target_format: String,
}

impl Task for ConvertAudio {
    const TYPE_NAME: &'static str = "ConvertAudio";
}

/// Payload shape carried in the [`TaskResult`] posted for a
/// [`ConvertAudio`]. `target_blob_id` is `None` when the task failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertAudioResult {
    /// Id of the converted blob, present on success.
    pub target_blob_id: Option<String>,
}

/// Bounds how many conversions run at once; task types beyond that bound
/// are re-posted to the back of the queue rather than queued up locally,
/// matching the Python handler's `len(self._running_processes) >
/// self._max_processes` check.
pub struct ConvertAudioHandler {
    blobs: Arc<dyn BlobStore>,
    in_flight: AtomicUsize,
    max_in_flight: usize,
}

impl ConvertAudioHandler {
    /// Build a handler backed by `blobs`, admitting at most
    /// `max_in_flight` conversions at once.
    pub fn new(blobs: Arc<dyn BlobStore>, max_in_flight: usize) -> Arc<Self> {
        Arc::new(Self {
            blobs,
            in_flight: AtomicUsize::new(0),
            max_in_flight,
        })
    }

    /// Conversions currently in flight, for tests asserting the admission
    /// bound held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    async fn convert_audio(
        &self,
        task: ConvertAudio,
        envelope: TaskEnvelope,
        ctx: tapecore_dispatch::DispatchContext,
    ) -> anyhow::Result<()> {
        if self.in_flight.load(Ordering::SeqCst) >= self.max_in_flight {
            tracing::debug!(task_id = %envelope.id, "convert audio at capacity, re-posting");
            ctx.post_task(task).await?;
            return Ok(());
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.run_conversion(&task).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = match outcome {
            Ok(target_blob_id) => {
                let payload = serde_json::to_value(ConvertAudioResult {
                    target_blob_id: Some(target_blob_id),
                })?;
                TaskResult::success(envelope, payload)
            }
            Err(err) => {
                tracing::error!(error = %err, "audio conversion failed");
                TaskResult::failure(envelope, err.to_string())
            }
        };

        ctx.post_task(result).await?;
        Ok(())
    }

    async fn run_conversion(&self, task: &ConvertAudio) -> anyhow::Result<String> {
        let mut reader = self.blobs.open(&task.source_blob_id).await?;
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut bytes).await?;
        let target_id = self
            .blobs
            .store(&format!("converted.{}", task.target_format), &bytes)
            .await?;
        Ok(target_id)
    }
}

impl TaskHandlerSet for ConvertAudioHandler {
    fn register(self: Arc<Self>, dispatcher: &Dispatcher) {
        dispatcher.register_task_handler_callback(move |task: ConvertAudio, envelope, ctx| {
            let handler = self.clone();
            async move { handler.convert_audio(task, envelope, ctx).await }
        });
    }
}
