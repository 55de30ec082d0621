//! Core engine types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod model;

pub use config::{
    EngineConfig, LayoutConfig, LlmConfig, QueueConfig, ServerConfig, StorageConfig, StreamConfig,
};
pub use errors::{EngineError, EngineResult};
pub use ids::{ConversationId, EdgeId, MessageId, ProjectId, SelectionId, TaskId, UserId};
pub use model::{
    Conversation, ConversationStatus, Edge, Fork, Message, MessageRole, Position, Project,
    Selection,
};
