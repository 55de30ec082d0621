//! Conversation store trait.

use std::future::Future;
use std::pin::Pin;

use crate::core::errors::EngineResult;
use crate::core::ids::{ConversationId, MessageId, ProjectId, UserId};
use crate::core::model::{Conversation, Edge, Message, MessageRole, Project};
use crate::storage::transaction::Transaction;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence for projects, conversations, messages, selections and edges.
///
/// Reads see committed state. Every write goes through [`ConversationStore::commit`].
pub trait ConversationStore: Send + Sync {
    /// Load a project.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_project_by_id(&self, id: ProjectId) -> StoreFuture<'_, EngineResult<Option<Project>>>;

    /// List a user's projects, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_projects_by_user(&self, user: UserId) -> StoreFuture<'_, EngineResult<Vec<Project>>>;

    /// Load a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_conversation_by_id(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Option<Conversation>>>;

    /// Earliest-created conversation of a project.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_oldest_conversation_by_project_id(
        &self,
        project: ProjectId,
    ) -> StoreFuture<'_, EngineResult<Option<Conversation>>>;

    /// Number of conversations in a project.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count_conversations_by_project_id(
        &self,
        project: ProjectId,
    ) -> StoreFuture<'_, EngineResult<u64>>;

    /// Messages of a conversation in creation order, each carrying its forks.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_messages_by_conversation_id(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Vec<Message>>>;

    /// Load one message.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_message_by_id(&self, id: MessageId) -> StoreFuture<'_, EngineResult<Option<Message>>>;

    /// Newest message of a conversation with a non-empty summary.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_latest_message_with_summary(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Option<Message>>>;

    /// Newest message of a conversation with the given role.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_latest_message_by_role(
        &self,
        conversation: ConversationId,
        role: MessageRole,
    ) -> StoreFuture<'_, EngineResult<Option<Message>>>;

    /// Number of messages with the given role in a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count_messages_by_role(
        &self,
        conversation: ConversationId,
        role: MessageRole,
    ) -> StoreFuture<'_, EngineResult<u64>>;

    /// Edges stored under a conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_edges_by_conversation_id(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Vec<Edge>>>;

    /// Apply every staged write atomically.
    ///
    /// # Errors
    /// Returns `PersistenceFailed` if any write fails; nothing is applied then.
    fn commit(&self, tx: Transaction) -> StoreFuture<'_, EngineResult<()>>;
}
