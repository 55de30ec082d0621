//! Explicit unit-of-work handle.
//!
//! Writes are staged on a [`Transaction`] and applied by the store in a single
//! `SQLite` transaction on commit. Reads never go through the handle; callers
//! read and validate first, then stage every write of the unit of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::errors::EngineResult;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::model::{Conversation, ConversationStatus, Edge, Message, Project, Selection};
use crate::storage::store::ConversationStore;

/// One staged write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Insert a project.
    CreateProject(Project),
    /// Insert a conversation.
    CreateConversation(Conversation),
    /// Insert a message.
    CreateMessage(Message),
    /// Insert a selection.
    CreateSelection(Selection),
    /// Insert an edge.
    CreateEdge(Edge),
    /// Change a conversation's status.
    UpdateConversationStatus {
        /// Conversation to update.
        id: ConversationId,
        /// New status.
        status: ConversationStatus,
        /// Update time.
        at: DateTime<Utc>,
    },
    /// Overwrite a message's running summary.
    UpdateMessageSummary {
        /// Message to update.
        id: MessageId,
        /// New summary text.
        summary: String,
    },
}

/// Ordered batch of writes that commit together or not at all.
#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    /// Start an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a project insert.
    pub fn create_project(&mut self, project: Project) {
        self.ops.push(WriteOp::CreateProject(project));
    }

    /// Stage a conversation insert.
    pub fn create_conversation(&mut self, conversation: Conversation) {
        self.ops.push(WriteOp::CreateConversation(conversation));
    }

    /// Stage a message insert.
    pub fn create_message(&mut self, message: Message) {
        self.ops.push(WriteOp::CreateMessage(message));
    }

    /// Stage a selection insert.
    pub fn create_selection(&mut self, selection: Selection) {
        self.ops.push(WriteOp::CreateSelection(selection));
    }

    /// Stage an edge insert.
    pub fn create_edge(&mut self, edge: Edge) {
        self.ops.push(WriteOp::CreateEdge(edge));
    }

    /// Stage a status change.
    pub fn update_conversation_status(&mut self, id: ConversationId, status: ConversationStatus) {
        self.ops.push(WriteOp::UpdateConversationStatus {
            id,
            status,
            at: Utc::now(),
        });
    }

    /// Stage a summary overwrite.
    pub fn update_message_summary(&mut self, id: MessageId, summary: impl Into<String>) {
        self.ops.push(WriteOp::UpdateMessageSummary {
            id,
            summary: summary.into(),
        });
    }

    /// Staged writes in order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch.
    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Runs units of work against a store with all-or-nothing semantics.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn ConversationStore>,
}

impl TransactionCoordinator {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Run `work` against a fresh transaction and commit what it staged.
    ///
    /// If `work` fails nothing is written. If the commit fails every staged
    /// write is rolled back.
    ///
    /// # Errors
    /// Returns the error from `work` or from the commit.
    pub async fn run_in_transaction<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Transaction) -> EngineResult<T>,
    {
        let mut tx = Transaction::new();
        let value = work(&mut tx)?;
        if tx.is_empty() {
            return Ok(value);
        }
        debug!(writes = tx.ops().len(), "committing transaction");
        self.store.commit(tx).await?;
        Ok(value)
    }
}
