//! Topic-based task queue with at-least-once delivery.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::TaskId;

/// Boxed future type for queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A task claimed from the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedTask {
    /// Task identifier.
    pub id: TaskId,
    /// Topic it was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: String,
    /// Delivery attempts so far, including this one.
    pub attempts: u32,
}

/// Queue backend.
///
/// A claimed task stays invisible until it is acked, nacked, or its
/// visibility timeout runs out.
pub trait TaskQueue: Send + Sync {
    /// Publish a payload on a topic.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the task cannot be stored.
    fn publish(&self, topic: &str, payload: String) -> QueueFuture<'_, EngineResult<TaskId>>;

    /// Claim the oldest visible task on a topic.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the queue cannot be read.
    fn claim(&self, topic: &str) -> QueueFuture<'_, EngineResult<Option<QueuedTask>>>;

    /// Remove a task that was handled.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the queue cannot be written.
    fn ack(&self, id: TaskId) -> QueueFuture<'_, EngineResult<()>>;

    /// Return a task for redelivery.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the queue cannot be written.
    fn nack(&self, id: TaskId) -> QueueFuture<'_, EngineResult<()>>;
}

/// Publish a JSON-encoded payload.
///
/// # Errors
/// Returns `UpstreamFailed` if encoding or publishing fails.
pub async fn publish_json<T: serde::Serialize + Sync>(
    queue: &dyn TaskQueue,
    topic: &str,
    payload: &T,
) -> EngineResult<TaskId> {
    let encoded = serde_json::to_string(payload)
        .map_err(|err| EngineError::UpstreamFailed(format!("cannot encode payload: {err}")))?;
    queue.publish(topic, encoded).await
}

/// One delivered task with its acknowledgement handle.
pub struct Delivery {
    task: QueuedTask,
    queue: Arc<dyn TaskQueue>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("task", &self.task).finish()
    }
}

impl Delivery {
    /// The delivered task.
    #[must_use]
    pub const fn task(&self) -> &QueuedTask {
        &self.task
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    /// Returns `ValidationFailed` if the payload does not decode.
    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_str(&self.task.payload).map_err(|err| {
            EngineError::ValidationFailed(format!("undecodable task payload: {err}"))
        })
    }

    /// Acknowledge: the task will not be delivered again.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be written.
    pub async fn ack(self) -> EngineResult<()> {
        self.queue.ack(self.task.id).await
    }

    /// Negative-acknowledge: the task will be redelivered later.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be written.
    pub async fn nack(self) -> EngineResult<()> {
        self.queue.nack(self.task.id).await
    }
}

/// Polling iterator over one topic.
pub struct Subscription {
    queue: Arc<dyn TaskQueue>,
    topic: String,
    poll_interval: Duration,
}

impl Subscription {
    /// Subscribe to `topic`, polling every `poll_interval` while idle.
    #[must_use]
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        topic: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            topic: topic.into(),
            poll_interval,
        }
    }

    /// Topic this subscription reads.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Claim the next task without waiting.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read.
    pub async fn try_next(&self) -> EngineResult<Option<Delivery>> {
        let task = self.queue.claim(&self.topic).await?;
        Ok(task.map(|task| {
            debug!(
                task_id = %task.id,
                topic = %task.topic,
                attempts = task.attempts,
                "task claimed"
            );
            Delivery {
                task,
                queue: Arc::clone(&self.queue),
            }
        }))
    }

    /// Wait for the next task.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read.
    pub async fn next(&self) -> EngineResult<Delivery> {
        loop {
            if let Some(delivery) = self.try_next().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
