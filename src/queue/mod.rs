//! Background task queue.

pub mod sqlite_queue;
pub mod task_queue;

pub use sqlite_queue::SqliteTaskQueue;
pub use task_queue::{
    Delivery, QueueFuture, QueuedTask, Subscription, TaskQueue, publish_json,
};
