//! Branch tree projection for visualization.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId, ProjectId};
use crate::core::model::{Edge, Message, MessageRole, Position};
use crate::storage::store::ConversationStore;

/// One visual node: an assistant message, optionally paired with the user
/// message right before it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The assistant message's id.
    pub id: MessageId,
    /// Conversation the node belongs to.
    pub conversation_id: ConversationId,
    /// Preceding user message, absent for a fork seed.
    pub user_message: Option<String>,
    /// Assistant message text.
    pub assistant_message: String,
    /// The assistant message's layout position.
    pub position: Position,
}

/// Whole-project graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchTree {
    /// Visual nodes in traversal order.
    pub nodes: Vec<TreeNode>,
    /// Stored edges of every visited conversation.
    pub edges: Vec<Edge>,
}

/// Builds [`BranchTree`]s by breadth-first traversal over fork links.
pub struct TreeBuilder {
    store: Arc<dyn ConversationStore>,
}

impl TreeBuilder {
    /// Build a tree builder.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Reconstruct the branch graph of a project, starting at its
    /// earliest-created conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if the project has no conversation and
    /// `PersistenceFailed` if a read fails.
    pub async fn build_tree(&self, project_id: ProjectId) -> EngineResult<BranchTree> {
        let root = self
            .store
            .find_oldest_conversation_by_project_id(project_id)
            .await?
            .ok_or_else(|| EngineError::not_found("project", project_id))?;

        let mut tree = BranchTree::default();
        let mut queue = VecDeque::from([root.id]);
        let mut visited = HashSet::from([root.id]);

        while let Some(conversation_id) = queue.pop_front() {
            let messages = self
                .store
                .find_messages_by_conversation_id(conversation_id)
                .await?;

            tree.nodes.extend(pair_messages(conversation_id, &messages));

            for fork in messages.iter().flat_map(|m| m.forks.iter()) {
                if visited.insert(fork.conversation_id) {
                    queue.push_back(fork.conversation_id);
                }
            }

            let edges = self
                .store
                .find_edges_by_conversation_id(conversation_id)
                .await?;
            debug!(
                conversation_id = %conversation_id,
                messages = messages.len(),
                edges = edges.len(),
                "tree visited conversation"
            );
            tree.edges.extend(edges);
        }

        info!(
            project_id = %project_id,
            conversations = visited.len(),
            nodes = tree.nodes.len(),
            edges = tree.edges.len(),
            "branch tree built"
        );
        Ok(tree)
    }
}

/// Turn an ordered history into nodes.
#[must_use]
pub fn pair_messages(conversation_id: ConversationId, messages: &[Message]) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    let mut pending_user: Option<&Message> = None;

    for message in messages {
        match message.role {
            MessageRole::User => pending_user = Some(message),
            MessageRole::Assistant => nodes.push(TreeNode {
                id: message.id,
                conversation_id,
                user_message: pending_user.take().map(|user| user.content.clone()),
                assistant_message: message.content.clone(),
                position: message.position,
            }),
            MessageRole::MergeReport => pending_user = None,
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Conversation, Selection};
    use crate::storage::sqlite_store::SqliteConversationStore;
    use crate::storage::transaction::Transaction;
    use chrono::Duration;

    fn ordered(messages: &mut [Message]) {
        let base = chrono::Utc::now();
        for (offset, message) in messages.iter_mut().enumerate() {
            message.created_at = base + Duration::milliseconds(i64::try_from(offset).unwrap());
        }
    }

    #[tokio::test]
    async fn single_conversation_pairs_user_and_assistant() {
        let store = Arc::new(SqliteConversationStore::open_in_memory().await.unwrap());
        let root = Conversation::root(ProjectId::new(), "root");
        let mut messages = vec![
            Message::user(root.id, "hi"),
            Message::assistant(root.id, "hello"),
        ];
        ordered(&mut messages);
        let hello = messages[1].id;

        let mut tx = Transaction::new();
        tx.create_conversation(root.clone());
        for message in messages {
            tx.create_message(message);
        }
        store.commit(tx).await.unwrap();

        let tree = TreeBuilder::new(store).build_tree(root.project_id).await.unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].id, hello);
        assert_eq!(tree.nodes[0].user_message.as_deref(), Some("hi"));
        assert_eq!(tree.nodes[0].assistant_message, "hello");
        assert!(tree.edges.is_empty());
    }

    #[tokio::test]
    async fn forks_are_followed_breadth_first() {
        let store = Arc::new(SqliteConversationStore::open_in_memory().await.unwrap());
        let project = ProjectId::new();
        let root = Conversation::root(project, "root");
        let mut root_messages = vec![
            Message::user(root.id, "q"),
            Message::assistant(root.id, "a"),
        ];
        ordered(&mut root_messages);
        let anchor = root_messages[1].id;

        let selection = Selection::new("a", 0, 1).unwrap();
        let mut child = Conversation::root(project, "child");
        child.created_at = root.created_at + Duration::seconds(1);
        child.parent_id = Some(root.id);
        child.source_message_id = Some(anchor);
        child.selection_id = Some(selection.id);
        let seed = Message::assistant(child.id, "seed");
        let edge = Edge::new(child.id, seed.id, anchor);
        let seed_id = seed.id;

        let mut tx = Transaction::new();
        tx.create_conversation(root.clone());
        for message in root_messages {
            tx.create_message(message);
        }
        tx.create_selection(selection);
        tx.create_conversation(child.clone());
        tx.create_message(seed);
        tx.create_edge(edge.clone());
        store.commit(tx).await.unwrap();

        let tree = TreeBuilder::new(store).build_tree(project).await.unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].id, anchor);
        assert_eq!(tree.nodes[1].id, seed_id);
        assert_eq!(tree.nodes[1].conversation_id, child.id);
        assert_eq!(tree.nodes[1].user_message, None);
        assert_eq!(tree.edges.len(), 1);
        assert_eq!(tree.edges[0].id, edge.id);
        assert_eq!(tree.edges[0].target_message_id, anchor);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let store = Arc::new(SqliteConversationStore::open_in_memory().await.unwrap());
        let err = TreeBuilder::new(store)
            .build_tree(ProjectId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "project", .. }));
    }

    #[test]
    fn merge_report_breaks_pairing() {
        let conversation = ConversationId::new();
        let messages = vec![
            Message::user(conversation, "q"),
            Message::merge_report(conversation, MessageId::new(), ConversationId::new(), "r"),
            Message::assistant(conversation, "a"),
            Message::user(conversation, "unanswered"),
        ];
        let nodes = pair_messages(conversation, &messages);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].user_message, None);
    }
}
