//! Merge engine: fold a child conversation back into its parent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId};
use crate::core::model::{ConversationStatus, Message, MessageRole};
use crate::generation::client::GenerationClient;
use crate::generation::parts::{ContentPart, OutputConstraint};
use crate::storage::store::ConversationStore;
use crate::storage::transaction::TransactionCoordinator;

const MERGE_INSTRUCTION: &str = "Write a report of the branch conversation described above for \
     the conversation it was forked from. Use two sections: \"Flow of discussion\", tracing how \
     the branch developed, and \"Conclusion\", stating what it settled on.";

/// Suggested merge report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreview {
    /// Proposed report text.
    pub suggested_summary: String,
}

/// Outcome of a merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// The report message written into the parent.
    pub report_message_id: MessageId,
    /// Report text.
    pub summary_content: String,
}

/// Writes merge reports and retires merged children.
pub struct MergeEngine {
    store: Arc<dyn ConversationStore>,
    transactions: TransactionCoordinator,
    generator: Arc<dyn GenerationClient>,
    model: String,
}

impl MergeEngine {
    /// Build a merge engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transactions: TransactionCoordinator::new(Arc::clone(&store)),
            store,
            generator,
            model: model.into(),
        }
    }

    /// Draft a report from why the child branched, how far it got, and its
    /// latest answer. Nothing is persisted.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown child, `InvalidState` when the child
    /// has nothing to report, and `UpstreamFailed` if generation fails.
    pub async fn get_merge_preview(&self, child_id: ConversationId) -> EngineResult<MergePreview> {
        let child = self
            .store
            .find_conversation_by_id(child_id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", child_id))?;

        let progress = self.store.find_latest_message_with_summary(child_id).await?;
        let conclusion = self
            .store
            .find_latest_message_by_role(child_id, MessageRole::Assistant)
            .await?;

        let mut parts = Vec::new();
        if let Some(origin) = child.summary.as_deref().filter(|s| !s.is_empty()) {
            parts.push(ContentPart::user(format!(
                "Why this branch was opened:\n{origin}"
            )));
        }
        if let Some(summary) = progress.as_ref().and_then(Message::boundary_summary) {
            parts.push(ContentPart::user(format!(
                "Summary of the branch so far:\n{summary}"
            )));
        }
        if let Some(latest) = &conclusion {
            parts.push(ContentPart::user(format!(
                "Latest answer in the branch:\n{}",
                latest.content
            )));
        }
        if parts.is_empty() {
            return Err(EngineError::empty_context());
        }
        parts.push(ContentPart::user(MERGE_INSTRUCTION));

        debug!(conversation_id = %child_id, parts = parts.len(), "requesting merge preview");
        let suggested_summary = self
            .generator
            .generate(&self.model, parts, OutputConstraint::Text)
            .await?;
        Ok(MergePreview { suggested_summary })
    }

    /// Write `summary_content` into the parent as a merge report and mark the
    /// child merged, atomically.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown child, `InvalidState` if the child was
    /// not produced by a fork, is already merged, or `parent_id` is not its
    /// parent, and `PersistenceFailed` if the write fails.
    pub async fn merge(
        &self,
        child_id: ConversationId,
        parent_id: ConversationId,
        summary_content: String,
    ) -> EngineResult<MergeOutcome> {
        info!(conversation_id = %child_id, parent_id = %parent_id, "merge requested");

        let child = self
            .store
            .find_conversation_by_id(child_id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", child_id))?;
        let source_message_id = child
            .source_message_id
            .ok_or_else(|| EngineError::not_forkable(child_id))?;
        if child.status == ConversationStatus::Merged {
            return Err(EngineError::InvalidState(format!(
                "conversation {child_id} is already merged"
            )));
        }
        if child.parent_id != Some(parent_id) {
            return Err(EngineError::InvalidState(format!(
                "conversation {parent_id} is not the parent of {child_id}"
            )));
        }

        let report =
            Message::merge_report(parent_id, source_message_id, child_id, summary_content.clone());
        let report_message_id = report.id;

        self.transactions
            .run_in_transaction(|tx| {
                tx.create_message(report);
                tx.update_conversation_status(child_id, ConversationStatus::Merged);
                Ok(())
            })
            .await?;

        info!(conversation_id = %child_id, report = %report_message_id, "merge completed");
        Ok(MergeOutcome {
            report_message_id,
            summary_content,
        })
    }
}
