//! Projects, conversation reads and plain user turns.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::config::LayoutConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId, ProjectId, UserId};
use crate::core::model::{Conversation, ConversationStatus, Message, MessageRole, Project};
use crate::engine::streaming::assistant_position;
use crate::storage::store::ConversationStore;
use crate::storage::transaction::TransactionCoordinator;

/// Records written by project creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectCreated {
    /// New project.
    pub project: Project,
    /// Its root conversation.
    pub conversation: Conversation,
    /// The seed user message.
    pub message: Message,
}

/// A message with the merge reports nested under it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    /// The message itself.
    #[serde(flatten)]
    pub message: Message,
    /// Reports of children merged back at this message.
    pub merge_reports: Vec<Message>,
}

/// Project lifecycle and conversation reads.
pub struct ProjectService {
    store: Arc<dyn ConversationStore>,
    transactions: TransactionCoordinator,
    layout: LayoutConfig,
}

impl ProjectService {
    /// Build a project service.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, layout: LayoutConfig) -> Self {
        Self {
            transactions: TransactionCoordinator::new(Arc::clone(&store)),
            store,
            layout,
        }
    }

    /// Create a project, its root conversation and the seed user message.
    ///
    /// # Errors
    /// Returns `ValidationFailed` for a blank message and `PersistenceFailed`
    /// if the write fails.
    pub async fn create_project(
        &self,
        user_id: UserId,
        initial_message: &str,
    ) -> EngineResult<ProjectCreated> {
        let content = non_blank(initial_message)?;
        let project = Project::new(user_id, content);
        let conversation = Conversation::root(project.id, content);
        let message = Message::user(conversation.id, content).at(conversation.position);
        let created = ProjectCreated {
            project,
            conversation,
            message,
        };

        let staged = created.clone();
        self.transactions
            .run_in_transaction(|tx| {
                tx.create_project(staged.project);
                tx.create_conversation(staged.conversation);
                tx.create_message(staged.message);
                Ok(())
            })
            .await?;

        info!(
            project_id = %created.project.id,
            conversation_id = %created.conversation.id,
            "project created"
        );
        Ok(created)
    }

    /// A user's projects, most recently updated first.
    ///
    /// # Errors
    /// Returns `PersistenceFailed` if the read fails.
    pub async fn list_projects(&self, user_id: UserId) -> EngineResult<Vec<Project>> {
        self.store.find_projects_by_user(user_id).await
    }

    /// The earliest-created conversation of a project.
    ///
    /// # Errors
    /// Returns `NotFound` if the project has no conversation.
    pub async fn get_root_conversation(&self, project_id: ProjectId) -> EngineResult<Conversation> {
        self.store
            .find_oldest_conversation_by_project_id(project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))
    }

    /// Load a conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if it does not exist.
    pub async fn get_conversation(&self, id: ConversationId) -> EngineResult<Conversation> {
        self.store
            .find_conversation_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", id))
    }

    /// Messages in creation order with forks attached and merge reports nested.
    ///
    /// # Errors
    /// Returns `NotFound` if the conversation does not exist.
    pub async fn get_messages(&self, id: ConversationId) -> EngineResult<Vec<MessageView>> {
        self.get_conversation(id).await?;
        let messages = self.store.find_messages_by_conversation_id(id).await?;
        Ok(nest_merge_reports(messages))
    }

    /// Append a user message.
    ///
    /// # Errors
    /// Returns `ValidationFailed` for blank content, `NotFound` for an unknown
    /// conversation and `InvalidState` if it was merged.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> EngineResult<Message> {
        let content = non_blank(content)?;
        let conversation = self.get_conversation(conversation_id).await?;
        if conversation.status == ConversationStatus::Merged {
            return Err(EngineError::InvalidState(format!(
                "conversation {conversation_id} is merged"
            )));
        }

        let answered = self
            .store
            .count_messages_by_role(conversation_id, MessageRole::Assistant)
            .await?;
        let message = Message::user(conversation_id, content)
            .at(assistant_position(&conversation, answered, &self.layout));
        let persisted = message.clone();
        self.transactions
            .run_in_transaction(|tx| {
                tx.create_message(message);
                Ok(())
            })
            .await?;

        info!(conversation_id = %conversation_id, message_id = %persisted.id, "user message added");
        Ok(persisted)
    }

    /// Park a conversation.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown conversation and `InvalidState` if it was merged.
    pub async fn close_conversation(&self, id: ConversationId) -> EngineResult<()> {
        self.set_status(id, ConversationStatus::Closed).await
    }

    /// Reopen a parked conversation.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown conversation and `InvalidState` if it was merged.
    pub async fn open_conversation(&self, id: ConversationId) -> EngineResult<()> {
        self.set_status(id, ConversationStatus::Open).await
    }

    async fn set_status(&self, id: ConversationId, status: ConversationStatus) -> EngineResult<()> {
        let conversation = self.get_conversation(id).await?;
        if conversation.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "conversation {id} is {} and cannot become {status}",
                conversation.status
            )));
        }
        self.transactions
            .run_in_transaction(|tx| {
                tx.update_conversation_status(id, status);
                Ok(())
            })
            .await?;
        info!(conversation_id = %id, status = %status, "conversation status changed");
        Ok(())
    }
}

/// Move merge reports under the message they were forked from.
///
/// Reports whose anchor is not in the list stay at the top level.
#[must_use]
pub fn nest_merge_reports(messages: Vec<Message>) -> Vec<MessageView> {
    let present: std::collections::HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
    let mut nested: HashMap<MessageId, Vec<Message>> = HashMap::new();
    let mut top = Vec::with_capacity(messages.len());

    for message in messages {
        match message.parent_message_id {
            Some(anchor)
                if message.role == MessageRole::MergeReport && present.contains(&anchor) =>
            {
                nested.entry(anchor).or_default().push(message);
            }
            _ => top.push(message),
        }
    }

    top.into_iter()
        .map(|message| MessageView {
            merge_reports: nested.remove(&message.id).unwrap_or_default(),
            message,
        })
        .collect()
}

fn non_blank(content: &str) -> EngineResult<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EngineError::ValidationFailed(
            "message content is empty".to_string(),
        ));
    }
    Ok(trimmed)
}
