//! Background summarization worker.
//!
//! Consumes summarization tasks, folds the unsummarized tail of a
//! conversation into a new running summary, and stores it on the newest
//! message so later context windows can start from there.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId};
use crate::engine::context::{BoundarySearch, slice_window};
use crate::generation::client::GenerationClient;
use crate::generation::parts::{ContentPart, OutputConstraint};
use crate::queue::task_queue::{Delivery, Subscription};
use crate::storage::store::ConversationStore;
use crate::storage::transaction::TransactionCoordinator;

const SUMMARY_INSTRUCTION: &str = "Summarize the conversation above so that it can be resumed \
     from the summary alone. Keep every decision, open question and important detail; drop \
     greetings and repetition. Reply with the summary text only.";

/// Result of handling one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Nothing after the boundary; no generation call was made.
    AlreadySummarized,
    /// A new summary was stored on this message.
    Summarized(MessageId),
}

/// Long-lived consumer of summarization tasks.
pub struct SummaryWorker {
    store: Arc<dyn ConversationStore>,
    transactions: TransactionCoordinator,
    generator: Arc<dyn GenerationClient>,
    subscription: Subscription,
    model: String,
    shutdown: Arc<Notify>,
}

impl SummaryWorker {
    /// Create a worker reading `subscription`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationClient>,
        subscription: Subscription,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transactions: TransactionCoordinator::new(Arc::clone(&store)),
            store,
            generator,
            subscription,
            model: model.into(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker loop as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Process tasks one at a time until shutdown is signaled.
    async fn run(&self) {
        info!(topic = %self.subscription.topic(), "starting summary worker");
        loop {
            tokio::select! {
                next = self.subscription.next() => match next {
                    Ok(delivery) => {
                        self.process(delivery).await;
                    }
                    Err(err) => {
                        error!(error = %err, "summary subscription failed");
                        tokio::select! {
                            () = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                            () = self.shutdown.notified() => break,
                        }
                    }
                },
                () = self.shutdown.notified() => break,
            }
        }
        info!("summary worker shutting down");
    }

    /// Claim and process a single pending task, if any.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be read. Handler failures are
    /// reported through a nack and come back as `Ok(None)`.
    pub async fn run_once(&self) -> EngineResult<Option<SummaryOutcome>> {
        match self.subscription.try_next().await? {
            Some(delivery) => Ok(self.process(delivery).await),
            None => Ok(None),
        }
    }

    async fn process(&self, delivery: Delivery) -> Option<SummaryOutcome> {
        let task_id = delivery.task().id;
        let attempts = delivery.task().attempts;
        let handled = match delivery.decode::<ConversationId>() {
            Ok(conversation_id) => self.summarize(conversation_id).await,
            Err(err) => Err(err),
        };

        match handled {
            Ok(outcome) => {
                if let Err(err) = delivery.ack().await {
                    error!(task_id = %task_id, error = %err, "failed to ack summary task");
                }
                Some(outcome)
            }
            Err(err) => {
                warn!(task_id = %task_id, attempts, error = %err, "summary task failed, nacking");
                if let Err(nack_err) = delivery.nack().await {
                    error!(task_id = %task_id, error = %nack_err, "failed to nack summary task");
                }
                None
            }
        }
    }

    /// Recompute the running summary of a conversation from its stored state.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if generation fails or returns a blank
    /// summary, and `PersistenceFailed` on store errors.
    pub async fn summarize(&self, conversation_id: ConversationId) -> EngineResult<SummaryOutcome> {
        let messages = self
            .store
            .find_messages_by_conversation_id(conversation_id)
            .await?;
        let window = slice_window(&messages, None, BoundarySearch::Exclusive);
        let Some(last) = messages.last() else {
            debug!(conversation_id = %conversation_id, "no messages to summarize");
            return Ok(SummaryOutcome::AlreadySummarized);
        };
        if window.tail.is_empty() {
            debug!(conversation_id = %conversation_id, "tail already summarized");
            return Ok(SummaryOutcome::AlreadySummarized);
        }

        let mut parts = window.to_parts();
        parts.push(ContentPart::user(SUMMARY_INSTRUCTION));
        debug!(
            conversation_id = %conversation_id,
            tail = window.tail.len(),
            prior = window.summary().is_some(),
            "requesting summary"
        );

        let summary = self
            .generator
            .generate(&self.model, parts, OutputConstraint::Text)
            .await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(EngineError::UpstreamFailed(
                "generation returned an empty summary".to_string(),
            ));
        }

        let target = last.id;
        self.transactions
            .run_in_transaction(|tx| {
                tx.update_message_summary(target, summary);
                Ok(())
            })
            .await?;

        info!(conversation_id = %conversation_id, message_id = %target, "running summary updated");
        Ok(SummaryOutcome::Summarized(target))
    }
}
