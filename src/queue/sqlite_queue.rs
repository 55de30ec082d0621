//! `SQLite`-backed task queue.

use chrono::Utc;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::core::config::{QueueConfig, StorageConfig};
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::TaskId;
use crate::queue::task_queue::{QueueFuture, QueuedTask, TaskQueue};

const STATUS_PENDING: &str = "pending";
const STATUS_IN_FLIGHT: &str = "in_flight";
const STATUS_DEAD: &str = "dead";

/// Task queue persisted in a `SQLite` table.
pub struct SqliteTaskQueue {
    conn: Connection,
    visibility_timeout_ms: i64,
    retry_backoff_ms: i64,
    max_attempts: u32,
}

impl SqliteTaskQueue {
    /// Open the queue table inside the configured database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(storage: &StorageConfig, config: &QueueConfig) -> EngineResult<Self> {
        let conn = Connection::open(&storage.sqlite_path).await?;
        Self::init(conn, config).await
    }

    /// Open a queue in a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open_in_memory(config: &QueueConfig) -> EngineResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, config).await
    }

    async fn init(conn: Connection, config: &QueueConfig) -> EngineResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    topic TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    status TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    available_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_topic_status
                    ON tasks (topic, status, available_at);",
            )?;
            Ok(())
        })
        .await
        .map_err(upstream)?;

        Ok(Self {
            conn,
            visibility_timeout_ms: millis(config.visibility_timeout_secs.saturating_mul(1000)),
            retry_backoff_ms: millis(config.retry_backoff_ms),
            max_attempts: config.max_attempts,
        })
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn publish(&self, topic: &str, payload: String) -> QueueFuture<'_, EngineResult<TaskId>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let id = TaskId::new();
            let now = Utc::now().timestamp_millis();
            let log_topic = topic.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO tasks
                             (id, topic, payload, status, attempts, available_at, created_at)
                         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                        rusqlite::params![id, topic, payload, STATUS_PENDING, now],
                    )?;
                    Ok(())
                })
                .await
                .map_err(upstream)?;
            debug!(task_id = %id, topic = %log_topic, "task published");
            Ok(id)
        })
    }

    fn claim(&self, topic: &str) -> QueueFuture<'_, EngineResult<Option<QueuedTask>>> {
        let topic = topic.to_string();
        let visibility = self.visibility_timeout_ms;
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let row = tx
                        .query_row(
                            "SELECT id, payload, attempts FROM tasks
                             WHERE topic = ?1 AND status IN (?2, ?3) AND available_at <= ?4
                             ORDER BY created_at ASC, rowid ASC
                             LIMIT 1",
                            rusqlite::params![topic, STATUS_PENDING, STATUS_IN_FLIGHT, now],
                            |row| {
                                let id: TaskId = row.get(0)?;
                                let payload: String = row.get(1)?;
                                let attempts: i64 = row.get(2)?;
                                Ok((id, payload, attempts))
                            },
                        )
                        .optional()?;

                    let Some((id, payload, attempts)) = row else {
                        return Ok(None);
                    };

                    tx.execute(
                        "UPDATE tasks SET status = ?1, attempts = attempts + 1, available_at = ?2
                         WHERE id = ?3",
                        rusqlite::params![STATUS_IN_FLIGHT, now.saturating_add(visibility), id],
                    )?;
                    tx.commit()?;

                    Ok(Some(QueuedTask {
                        id,
                        topic,
                        payload,
                        attempts: u32::try_from(attempts.saturating_add(1)).unwrap_or(u32::MAX),
                    }))
                })
                .await
                .map_err(upstream)
        })
    }

    fn ack(&self, id: TaskId) -> QueueFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
                    Ok(())
                })
                .await
                .map_err(upstream)?;
            debug!(task_id = %id, "task acked");
            Ok(())
        })
    }

    fn nack(&self, id: TaskId) -> QueueFuture<'_, EngineResult<()>> {
        let backoff = self.retry_backoff_ms;
        let max_attempts = i64::from(self.max_attempts);
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            let status = self
                .conn
                .call(move |conn| {
                    let attempts: Option<i64> = conn
                        .query_row(
                            "SELECT attempts FROM tasks WHERE id = ?1",
                            rusqlite::params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let Some(attempts) = attempts else {
                        return Ok(None);
                    };
                    let status = if max_attempts > 0 && attempts >= max_attempts {
                        STATUS_DEAD
                    } else {
                        STATUS_PENDING
                    };
                    conn.execute(
                        "UPDATE tasks SET status = ?1, available_at = ?2 WHERE id = ?3",
                        rusqlite::params![status, now.saturating_add(backoff), id],
                    )?;
                    Ok(Some(status))
                })
                .await
                .map_err(upstream)?;

            match status {
                Some(STATUS_DEAD) => {
                    warn!(task_id = %id, "task exceeded max attempts, parked as dead");
                }
                Some(_) => debug!(task_id = %id, "task nacked"),
                None => warn!(task_id = %id, "nack for unknown task"),
            }
            Ok(())
        })
    }
}

fn upstream(err: tokio_rusqlite::Error) -> EngineError {
    EngineError::UpstreamFailed(format!("task queue: {err}"))
}

fn millis(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::queue::task_queue::{Subscription, publish_json};

    fn config(backoff_ms: u64, visibility_secs: u64, max_attempts: u32) -> QueueConfig {
        QueueConfig {
            retry_backoff_ms: backoff_ms,
            visibility_timeout_secs: visibility_secs,
            max_attempts,
            ..QueueConfig::default()
        }
    }

    async fn subscription(config: &QueueConfig) -> (Arc<dyn TaskQueue>, Subscription) {
        let queue: Arc<dyn TaskQueue> =
            Arc::new(SqliteTaskQueue::open_in_memory(config).await.unwrap());
        let subscription =
            Subscription::new(Arc::clone(&queue), "chat_summary", Duration::from_millis(5));
        (queue, subscription)
    }

    async fn stored_tasks(queue: &SqliteTaskQueue) -> i64 {
        queue
            .conn
            .call(|conn| {
                let count = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn acked_task_is_not_redelivered() {
        let queue = Arc::new(SqliteTaskQueue::open_in_memory(&config(0, 300, 0)).await.unwrap());
        publish_json(queue.as_ref(), "chat_summary", &"abc").await.unwrap();
        let subscription =
            Subscription::new(queue.clone(), "chat_summary", Duration::from_millis(5));

        let delivery = subscription.next().await.unwrap();
        assert_eq!(delivery.decode::<String>().unwrap(), "abc");
        assert_eq!(delivery.task().attempts, 1);
        delivery.ack().await.unwrap();

        assert!(subscription.try_next().await.unwrap().is_none());
        assert_eq!(stored_tasks(&queue).await, 0);
    }

    #[tokio::test]
    async fn nacked_task_is_redelivered_after_backoff() {
        let (queue, subscription) = subscription(&config(0, 300, 0)).await;
        queue
            .publish("chat_summary", "\"x\"".to_string())
            .await
            .unwrap();

        let first = subscription.next().await.unwrap();
        let id = first.task().id;
        first.nack().await.unwrap();

        let second = subscription.next().await.unwrap();
        assert_eq!(second.task().id, id);
        assert_eq!(second.task().attempts, 2);
    }

    #[tokio::test]
    async fn claimed_task_stays_hidden_until_visibility_timeout() {
        let (queue, hidden) = subscription(&config(0, 300, 0)).await;
        queue.publish("chat_summary", "1".to_string()).await.unwrap();
        let _held = hidden.try_next().await.unwrap().unwrap();
        assert!(hidden.try_next().await.unwrap().is_none());

        let (queue, expiring) = subscription(&config(0, 0, 0)).await;
        queue.publish("chat_summary", "1".to_string()).await.unwrap();
        let _lost = expiring.try_next().await.unwrap().unwrap();
        let again = expiring.try_next().await.unwrap().unwrap();
        assert_eq!(again.task().attempts, 2);
    }

    #[tokio::test]
    async fn task_is_parked_after_max_attempts() {
        let (queue, subscription) = subscription(&config(0, 300, 1)).await;
        queue.publish("chat_summary", "1".to_string()).await.unwrap();
        subscription.next().await.unwrap().nack().await.unwrap();
        assert!(subscription.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let (queue, subscription) = subscription(&config(0, 300, 0)).await;
        queue.publish("other", "1".to_string()).await.unwrap();
        assert!(subscription.try_next().await.unwrap().is_none());
    }
}
