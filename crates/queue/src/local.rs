use std::collections::VecDeque;

use async_trait::async_trait;
use tapecore_task::TaskEnvelope;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{QueueError, TaskQueue};

/// In-process stand-in for [`crate::RedisTaskQueue`], used by tests and
/// single-process deployments. Same push-one-end/pop-one-end contract, no
/// external dependency.
#[derive(Default)]
pub struct LocalTaskQueue {
    items: Mutex<VecDeque<TaskEnvelope>>,
}

impl LocalTaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn put(&self, envelope: TaskEnvelope) -> Result<Uuid, QueueError> {
        let id = envelope.id;
        self.items.lock().await.push_front(envelope);
        Ok(id)
    }

    async fn fetch(&self) -> Result<Option<TaskEnvelope>, QueueError> {
        Ok(self.items.lock().await.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapecore_task::Task;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Echo {
        n: u32,
    }
    impl Task for Echo {
        const TYPE_NAME: &'static str = "Echo";
    }

    #[tokio::test]
    async fn fetch_on_empty_queue_returns_none() {
        let q = LocalTaskQueue::new();
        assert!(q.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_fetch_returns_the_same_envelope() {
        let q = LocalTaskQueue::new();
        let envelope = TaskEnvelope::encode(&Echo { n: 7 }).unwrap();
        let id = q.put(envelope.clone()).await.unwrap();
        assert_eq!(id, envelope.id);

        let fetched = q.fetch().await.unwrap().expect("envelope should be present");
        assert_eq!(fetched.id, envelope.id);
        assert!(q.fetch().await.unwrap().is_none());
    }

    /// Always-on equivalent of the S6 durable-cross-process scenario,
    /// against `LocalTaskQueue` instead of Redis: one handle posts 100
    /// tasks, a second independently held handle (two `Arc` clones over
    /// the same queue, standing in for two processes sharing one durable
    /// store) drains all 100, each exactly once.
    #[tokio::test]
    async fn hundred_posted_tasks_are_drained_exactly_once_across_two_handles() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let queue = Arc::new(LocalTaskQueue::new());
        let producer = queue.clone();
        let consumer = queue.clone();

        let mut posted = HashSet::new();
        for n in 0..100 {
            let envelope = TaskEnvelope::encode(&Echo { n }).unwrap();
            let id = producer.put(envelope).await.unwrap();
            posted.insert(id);
        }

        let mut drained = HashSet::new();
        while drained.len() < posted.len() {
            match consumer.fetch().await.unwrap() {
                Some(envelope) => {
                    assert!(drained.insert(envelope.id), "task {} delivered more than once", envelope.id);
                }
                None => break,
            }
        }

        assert_eq!(drained, posted);
        assert!(consumer.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_end_push_and_pop_is_last_in_first_out() {
        // Matches the backing store's LPUSH/LPOP contract: both operate on
        // the queue's front, so a single producer/consumer sees LIFO order,
        // not strict FIFO. The public contract only promises best-effort
        // ordering, never strict FIFO.
        let q = LocalTaskQueue::new();
        let first = TaskEnvelope::encode(&Echo { n: 1 }).unwrap();
        let second = TaskEnvelope::encode(&Echo { n: 2 }).unwrap();
        q.put(first.clone()).await.unwrap();
        q.put(second.clone()).await.unwrap();

        let fetched = q.fetch().await.unwrap().unwrap();
        assert_eq!(fetched.id, second.id);
    }
}
