//! Fork engine: branch a child conversation off a text selection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::LayoutConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId};
use crate::core::model::{Conversation, ConversationStatus, Edge, Message, Position, Selection};
use crate::engine::context::{BoundarySearch, slice_window};
use crate::generation::client::GenerationClient;
use crate::generation::parts::{ContentPart, OutputConstraint};
use crate::storage::store::ConversationStore;
use crate::storage::transaction::TransactionCoordinator;

/// Text the user selected inside a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedText {
    /// Selected substring.
    pub text: String,
    /// Start offset (inclusive).
    pub range_start: usize,
    /// End offset (exclusive).
    pub range_end: usize,
}

/// Everything needed to create a fork.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkRequest {
    /// Message in the parent the branch starts from.
    pub target_message_id: MessageId,
    /// Selection anchoring the branch.
    pub selection: SelectedText,
    /// Title of the child conversation.
    pub title: String,
    /// Opening context carried into the child as its running summary.
    pub summary: String,
}

/// Suggested title and opening context for a fork.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPreview {
    /// Proposed branch title.
    #[serde(rename = "suggested_title")]
    pub title: String,
    /// Proposed opening paragraph.
    #[serde(rename = "generated_context")]
    pub context: String,
}

/// Creates child conversations and previews them.
pub struct ForkEngine {
    store: Arc<dyn ConversationStore>,
    transactions: TransactionCoordinator,
    generator: Arc<dyn GenerationClient>,
    model: String,
    layout: LayoutConfig,
}

impl ForkEngine {
    /// Build a fork engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationClient>,
        model: impl Into<String>,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            transactions: TransactionCoordinator::new(Arc::clone(&store)),
            store,
            generator,
            model: model.into(),
            layout,
        }
    }

    /// Create a child conversation anchored to a selection in `parent_id`.
    ///
    /// The selection, the child, its seed message and an edge back to the
    /// target message are written in one transaction.
    ///
    /// # Errors
    /// Returns `NotFound` if the parent or target is missing,
    /// `ValidationFailed` for a bad selection or a target outside the parent,
    /// and `PersistenceFailed` if the write fails.
    pub async fn fork(
        &self,
        parent_id: ConversationId,
        request: ForkRequest,
    ) -> EngineResult<ConversationId> {
        info!(conversation_id = %parent_id, target = %request.target_message_id, "fork requested");

        let parent = self
            .store
            .find_conversation_by_id(parent_id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", parent_id))?;

        let selection = Selection::new(
            request.selection.text,
            request.selection.range_start,
            request.selection.range_end,
        )?;

        let target = self
            .store
            .find_message_by_id(request.target_message_id)
            .await?
            .ok_or_else(|| EngineError::not_found("message", request.target_message_id))?;
        if target.conversation_id != parent.id {
            return Err(EngineError::ValidationFailed(format!(
                "message {} does not belong to conversation {}",
                target.id, parent.id
            )));
        }

        let existing = self
            .store
            .count_conversations_by_project_id(parent.project_id)
            .await?;
        let position = fork_position(existing, target.position.y, &self.layout);

        let mut child = Conversation::root(parent.project_id, request.title.clone());
        child.parent_id = Some(parent.id);
        child.source_message_id = Some(target.id);
        child.selection_id = Some(selection.id);
        child.status = ConversationStatus::Open;
        child.summary = (!request.summary.is_empty()).then(|| request.summary.clone());
        child.position = position;

        let seed = Message::assistant(child.id, seed_content(&request.title, &request.summary))
            .at(position);
        let edge = Edge::new(child.id, seed.id, target.id);
        let child_id = child.id;

        self.transactions
            .run_in_transaction(|tx| {
                tx.create_selection(selection);
                tx.create_conversation(child);
                tx.create_message(seed);
                tx.create_edge(edge);
                Ok(())
            })
            .await?;

        info!(conversation_id = %child_id, parent_id = %parent_id, "fork created");
        Ok(child_id)
    }

    /// Ask the model for a title and opening context for a prospective fork.
    ///
    /// Nothing is persisted.
    ///
    /// # Errors
    /// Returns `NotFound` if the conversation or target is missing,
    /// `UpstreamFailed` if generation fails and `MalformedOutput` if the reply
    /// is not the expected JSON.
    pub async fn generate_fork_preview(
        &self,
        conversation_id: ConversationId,
        target_message_id: MessageId,
        selection: &SelectedText,
    ) -> EngineResult<ForkPreview> {
        if selection.range_start > selection.range_end {
            return Err(EngineError::ValidationFailed(format!(
                "selection range is inverted: [{}, {})",
                selection.range_start, selection.range_end
            )));
        }

        self.store
            .find_conversation_by_id(conversation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", conversation_id))?;

        let messages = self
            .store
            .find_messages_by_conversation_id(conversation_id)
            .await?;
        let target_idx = messages
            .iter()
            .position(|m| m.id == target_message_id)
            .ok_or_else(|| EngineError::not_found("message", target_message_id))?;

        let mut parts =
            slice_window(&messages, Some(target_idx), BoundarySearch::Inclusive).to_parts();
        parts.push(ContentPart::from_message(&messages[target_idx]));
        parts.push(ContentPart::user(preview_instruction(selection)));

        debug!(conversation_id = %conversation_id, parts = parts.len(), "requesting fork preview");
        let raw = self
            .generator
            .generate(&self.model, parts, OutputConstraint::Json)
            .await?;
        parse_preview(&raw)
    }
}

/// Child placement: one column per existing conversation, level with the target.
#[must_use]
pub fn fork_position(
    existing_conversations: u64,
    target_y: f64,
    layout: &LayoutConfig,
) -> Position {
    #[allow(clippy::cast_precision_loss)]
    let column = existing_conversations as f64;
    Position::new(column * layout.fork_horizontal_spacing, target_y)
}

/// Opening statement of a branch.
#[must_use]
pub fn seed_content(title: &str, summary: &str) -> String {
    if summary.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{summary}")
    }
}

fn preview_instruction(selection: &SelectedText) -> String {
    format!(
        "The user selected the text \"{}\" (characters {} to {}) in the last message above \
         and wants to open a new branch of the conversation about it. Propose a short title \
         for the branch and one opening paragraph giving the branch the context it needs. \
         Reply with a JSON object only: \
         {{\"suggested_title\": string, \"generated_context\": string}}.",
        selection.text, selection.range_start, selection.range_end
    )
}

fn parse_preview(raw: &str) -> EngineResult<ForkPreview> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|err| {
        EngineError::MalformedOutput(format!("fork preview is not valid JSON: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::ProjectId;
    use crate::core::model::{Fork, MessageRole};
    use crate::generation::client::scripted::ScriptedGenerator;
    use crate::storage::sqlite_store::SqliteConversationStore;
    use crate::storage::transaction::Transaction;

    struct Fixture {
        store: Arc<SqliteConversationStore>,
        generator: Arc<ScriptedGenerator>,
        engine: ForkEngine,
        parent: Conversation,
        messages: Vec<Message>,
    }

    async fn fixture(generator: ScriptedGenerator) -> Fixture {
        let store = Arc::new(SqliteConversationStore::open_in_memory().await.unwrap());
        let generator = Arc::new(generator);
        let parent = Conversation::root(ProjectId::new(), "root");
        let mut messages = vec![
            Message::user(parent.id, "hello"),
            Message::assistant(parent.id, "world").at(Position::new(0.0, 100.0)),
            Message::user(parent.id, "ignored"),
        ];
        for (offset, message) in messages.iter_mut().enumerate() {
            message.created_at += chrono::Duration::milliseconds(i64::try_from(offset).unwrap());
        }

        let mut tx = Transaction::new();
        tx.create_conversation(parent.clone());
        for message in &messages {
            tx.create_message(message.clone());
        }
        store.commit(tx).await.unwrap();

        let engine = ForkEngine::new(
            store.clone(),
            generator.clone(),
            "test-model",
            LayoutConfig::default(),
        );
        Fixture {
            store,
            generator,
            engine,
            parent,
            messages,
        }
    }

    fn request(target: MessageId) -> ForkRequest {
        ForkRequest {
            target_message_id: target,
            selection: SelectedText {
                text: "world".to_string(),
                range_start: 0,
                range_end: 5,
            },
            title: "New Chat".to_string(),
            summary: "Summary".to_string(),
        }
    }

    #[tokio::test]
    async fn fork_writes_child_seed_edge_and_selection() {
        let f = fixture(ScriptedGenerator::new()).await;
        let target = f.messages[1].id;

        let child_id = f.engine.fork(f.parent.id, request(target)).await.unwrap();

        let child = f.store.find_conversation_by_id(child_id).await.unwrap().unwrap();
        assert_eq!(child.parent_id, Some(f.parent.id));
        assert_eq!(child.source_message_id, Some(target));
        assert_eq!(child.status, ConversationStatus::Open);
        assert_eq!(child.summary.as_deref(), Some("Summary"));
        // One conversation existed before the fork.
        assert_eq!(child.position, Position::new(250.0, 100.0));

        let seed = f.store.find_messages_by_conversation_id(child_id).await.unwrap();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed[0].role, MessageRole::Assistant);
        assert_eq!(seed[0].content, "New Chat\n\nSummary");

        let edges = f.store.find_edges_by_conversation_id(child_id).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_message_id, seed[0].id);
        assert_eq!(edges[0].target_message_id, target);

        let parent_messages = f
            .store
            .find_messages_by_conversation_id(f.parent.id)
            .await
            .unwrap();
        assert_eq!(
            parent_messages[1].forks,
            vec![Fork {
                conversation_id: child_id,
                selected_text: "world".to_string(),
                range_start: 0,
                range_end: 5,
            }]
        );
    }

    #[tokio::test]
    async fn fork_on_missing_parent_writes_nothing() {
        let f = fixture(ScriptedGenerator::new()).await;
        let err = f
            .engine
            .fork(ConversationId::new(), request(f.messages[1].id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "conversation", .. }));
        assert_eq!(
            f.store
                .count_conversations_by_project_id(f.parent.project_id)
                .await
                .unwrap(),
            1
        );
        let parent_messages = f
            .store
            .find_messages_by_conversation_id(f.parent.id)
            .await
            .unwrap();
        assert!(parent_messages.iter().all(|m| m.forks.is_empty()));
    }

    #[tokio::test]
    async fn fork_rejects_inverted_selection_and_foreign_target() {
        let f = fixture(ScriptedGenerator::new()).await;
        let mut bad = request(f.messages[1].id);
        bad.selection.range_start = 9;
        assert!(matches!(
            f.engine.fork(f.parent.id, bad).await,
            Err(EngineError::ValidationFailed(_))
        ));

        let missing = f.engine.fork(f.parent.id, request(MessageId::new())).await;
        assert!(matches!(missing, Err(EngineError::NotFound { entity: "message", .. })));
    }

    #[tokio::test]
    async fn preview_sends_prefix_target_and_instruction() {
        let f = fixture(ScriptedGenerator::new().reply(
            r#"{"suggested_title": "New Title", "generated_context": "New Context"}"#,
        ))
        .await;
        let selection = SelectedText {
            text: "selected".to_string(),
            range_start: 0,
            range_end: 8,
        };

        let preview = f
            .engine
            .generate_fork_preview(f.parent.id, f.messages[1].id, &selection)
            .await
            .unwrap();
        assert_eq!(
            preview,
            ForkPreview {
                title: "New Title".to_string(),
                context: "New Context".to_string(),
            }
        );

        let calls = f.generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].constraint, OutputConstraint::Json);
        let texts: Vec<&str> = calls[0].parts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts[..2], ["hello", "world"]);
        assert_eq!(texts.len(), 3);
        assert!(texts[2].contains("\"selected\""));
    }

    #[tokio::test]
    async fn preview_failures_map_to_typed_errors() {
        let f = fixture(ScriptedGenerator::new().reply("invalid json").fail("down")).await;
        let selection = SelectedText {
            text: "x".to_string(),
            range_start: 0,
            range_end: 1,
        };

        let malformed = f
            .engine
            .generate_fork_preview(f.parent.id, f.messages[0].id, &selection)
            .await;
        assert!(matches!(malformed, Err(EngineError::MalformedOutput(_))));

        let upstream = f
            .engine
            .generate_fork_preview(f.parent.id, f.messages[0].id, &selection)
            .await;
        assert!(matches!(upstream, Err(EngineError::UpstreamFailed(_))));

        let missing = f
            .engine
            .generate_fork_preview(f.parent.id, MessageId::new(), &selection)
            .await;
        assert!(matches!(missing, Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let preview =
            parse_preview("```json\n{\"suggested_title\":\"t\",\"generated_context\":\"c\"}\n```")
                .unwrap();
        assert_eq!(preview.title, "t");
    }
}
