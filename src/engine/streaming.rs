//! Streaming response generation.
//!
//! The producer relays chunks into a bounded channel and persists the full
//! assistant message once the generation stream completes. A consumer that
//! goes away only stops the relaying; the stream is still drained and the
//! message still written so the history stays consistent for the next turn.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::config::LayoutConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::ConversationId;
use crate::core::model::{Conversation, Message, MessageRole, Position};
use crate::engine::context::{BoundarySearch, build_window};
use crate::generation::client::GenerationClient;
use crate::generation::parts::{ContentPart, OutputConstraint};
use crate::queue::task_queue::{TaskQueue, publish_json};
use crate::storage::store::ConversationStore;
use crate::storage::transaction::TransactionCoordinator;

/// One item delivered to the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Next piece of the response.
    Chunk(String),
    /// Generation failed; no message was persisted.
    Error(String),
}

/// Producer side of the chunk channel. Dropping it closes the channel.
#[derive(Debug)]
pub struct ChunkSink {
    tx: mpsc::Sender<StreamEvent>,
    connected: bool,
}

impl ChunkSink {
    /// Create a sink and its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                connected: true,
            },
            rx,
        )
    }

    /// Whether the consumer is still reading.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, event: StreamEvent) {
        if !self.connected {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("stream consumer disconnected, continuing without relaying");
            self.connected = false;
        }
    }

    /// Relay a chunk. Silently dropped once the consumer is gone.
    pub async fn send_chunk(&mut self, chunk: String) {
        self.send(StreamEvent::Chunk(chunk)).await;
    }

    /// Report a failure to the consumer.
    pub async fn fail(&mut self, err: &EngineError) {
        self.send(StreamEvent::Error(err.to_string())).await;
    }
}

/// Drives streamed generation for a conversation.
pub struct ResponseGenerator {
    store: Arc<dyn ConversationStore>,
    transactions: TransactionCoordinator,
    generator: Arc<dyn GenerationClient>,
    queue: Arc<dyn TaskQueue>,
    model: String,
    summary_topic: String,
    layout: LayoutConfig,
}

impl ResponseGenerator {
    /// Build a response generator.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationClient>,
        queue: Arc<dyn TaskQueue>,
        model: impl Into<String>,
        summary_topic: impl Into<String>,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            transactions: TransactionCoordinator::new(Arc::clone(&store)),
            store,
            generator,
            queue,
            model: model.into(),
            summary_topic: summary_topic.into(),
            layout,
        }
    }

    /// Answer the seed message of a fresh conversation.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown conversation, `InvalidState` unless
    /// the conversation holds exactly one message, `UpstreamFailed` if
    /// generation fails and `PersistenceFailed` if the answer cannot be saved.
    pub async fn generate_first(
        &self,
        conversation_id: ConversationId,
        mut sink: ChunkSink,
    ) -> EngineResult<Message> {
        let result = self.first(conversation_id, &mut sink).await;
        if let Err(err) = &result {
            sink.fail(err).await;
        }
        result
    }

    /// Answer the latest turn using the summary boundary and the tail after it.
    ///
    /// On success a summarization task is published; a publish failure is
    /// logged and otherwise ignored.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown conversation, `InvalidState` when
    /// there is no context at all, `UpstreamFailed` if generation fails and
    /// `PersistenceFailed` if the answer cannot be saved.
    pub async fn generate_next(
        &self,
        conversation_id: ConversationId,
        mut sink: ChunkSink,
    ) -> EngineResult<Message> {
        let result = self.next(conversation_id, &mut sink).await;
        match &result {
            Ok(_) => self.enqueue_summary(conversation_id).await,
            Err(err) => sink.fail(err).await,
        }
        result
    }

    async fn first(
        &self,
        conversation_id: ConversationId,
        sink: &mut ChunkSink,
    ) -> EngineResult<Message> {
        let conversation = self.load_conversation(conversation_id).await?;
        let messages = self
            .store
            .find_messages_by_conversation_id(conversation_id)
            .await?;
        let [seed] = messages.as_slice() else {
            return Err(EngineError::invalid_seed_state(messages.len()));
        };

        info!(conversation_id = %conversation_id, "generating first response");
        let parts = vec![ContentPart::user(seed.content.clone())];
        self.stream_and_persist(&conversation, parts, sink).await
    }

    async fn next(
        &self,
        conversation_id: ConversationId,
        sink: &mut ChunkSink,
    ) -> EngineResult<Message> {
        let conversation = self.load_conversation(conversation_id).await?;
        let messages = self
            .store
            .find_messages_by_conversation_id(conversation_id)
            .await?;
        let parts = build_window(&messages, None, BoundarySearch::Exclusive)?;

        info!(
            conversation_id = %conversation_id,
            history = messages.len(),
            parts = parts.len(),
            "generating next response"
        );
        self.stream_and_persist(&conversation, parts, sink).await
    }

    async fn load_conversation(&self, id: ConversationId) -> EngineResult<Conversation> {
        self.store
            .find_conversation_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found("conversation", id))
    }

    async fn stream_and_persist(
        &self,
        conversation: &Conversation,
        parts: Vec<ContentPart>,
        sink: &mut ChunkSink,
    ) -> EngineResult<Message> {
        let mut stream = self
            .generator
            .generate_stream(&self.model, parts, OutputConstraint::Text)
            .await?;

        let mut full = String::new();
        while let Some(item) = stream.next().await {
            let chunk = item?;
            full.push_str(&chunk);
            sink.send_chunk(chunk).await;
        }

        let answered = self
            .store
            .count_messages_by_role(conversation.id, MessageRole::Assistant)
            .await?;
        let position = assistant_position(conversation, answered, &self.layout);
        let message = Message::assistant(conversation.id, full).at(position);
        let persisted = message.clone();

        self.transactions
            .run_in_transaction(|tx| {
                tx.create_message(message);
                Ok(())
            })
            .await?;

        info!(
            conversation_id = %conversation.id,
            message_id = %persisted.id,
            chars = persisted.content.chars().count(),
            relayed = sink.is_connected(),
            "response persisted"
        );
        Ok(persisted)
    }

    async fn enqueue_summary(&self, conversation_id: ConversationId) {
        let payload = conversation_id.to_string();
        if let Err(err) = publish_json(self.queue.as_ref(), &self.summary_topic, &payload).await {
            warn!(
                conversation_id = %conversation_id,
                error = %err,
                "failed to enqueue summarization task"
            );
        }
    }
}

/// Placement of the next assistant message: one row per earlier answer.
#[must_use]
pub fn assistant_position(
    conversation: &Conversation,
    answered: u64,
    layout: &LayoutConfig,
) -> Position {
    #[allow(clippy::cast_precision_loss)]
    let row = answered as f64;
    Position::new(
        conversation.position.x,
        row.mul_add(layout.message_vertical_spacing, conversation.position.y),
    )
}
