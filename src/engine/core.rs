//! Engine orchestration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::core::config::EngineConfig;
use crate::core::errors::EngineResult;
use crate::engine::fork::ForkEngine;
use crate::engine::merge::MergeEngine;
use crate::engine::project::ProjectService;
use crate::engine::streaming::{ChunkSink, ResponseGenerator, StreamEvent};
use crate::engine::tree::TreeBuilder;
use crate::generation::client::GenerationClient;
use crate::generation::ollama::OllamaGenerator;
use crate::queue::sqlite_queue::SqliteTaskQueue;
use crate::queue::task_queue::{Subscription, TaskQueue};
use crate::storage::sqlite_store::SqliteConversationStore;
use crate::storage::store::ConversationStore;
use crate::worker::summary_worker::SummaryWorker;

/// Backend dependencies for the engine.
pub struct EngineBackends {
    /// Conversation store implementation.
    pub store: Arc<dyn ConversationStore>,
    /// Completion model client.
    pub generator: Arc<dyn GenerationClient>,
    /// Durable task queue.
    pub queue: Arc<dyn TaskQueue>,
}

impl EngineBackends {
    /// Build default `SQLite` and Ollama backends from config.
    ///
    /// # Errors
    /// Returns an error if any backend cannot be initialized.
    pub async fn sqlite(config: &EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(SqliteConversationStore::new(&config.storage).await?);
        let queue = Arc::new(SqliteTaskQueue::new(&config.storage, &config.queue).await?);
        let generator = Arc::new(OllamaGenerator::new(&config.llm)?);

        Ok(Self {
            store,
            generator,
            queue,
        })
    }
}

/// Every engine component wired to one set of backends.
pub struct ChatEngine {
    config: EngineConfig,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn GenerationClient>,
    queue: Arc<dyn TaskQueue>,
    projects: ProjectService,
    forks: ForkEngine,
    merges: MergeEngine,
    responses: ResponseGenerator,
    tree: TreeBuilder,
}

impl ChatEngine {
    /// Create a new engine.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig, backends: EngineBackends) -> EngineResult<Self> {
        config.validate()?;
        let EngineBackends {
            store,
            generator,
            queue,
        } = backends;
        let model = config.llm.model.clone();

        Ok(Self {
            projects: ProjectService::new(Arc::clone(&store), config.layout.clone()),
            forks: ForkEngine::new(
                Arc::clone(&store),
                Arc::clone(&generator),
                model.clone(),
                config.layout.clone(),
            ),
            merges: MergeEngine::new(Arc::clone(&store), Arc::clone(&generator), model.clone()),
            responses: ResponseGenerator::new(
                Arc::clone(&store),
                Arc::clone(&generator),
                Arc::clone(&queue),
                model,
                config.queue.summary_topic.clone(),
                config.layout.clone(),
            ),
            tree: TreeBuilder::new(Arc::clone(&store)),
            config,
            store,
            generator,
            queue,
        })
    }

    /// Create a new engine using `SQLite` and Ollama backends.
    ///
    /// # Errors
    /// Returns an error if backends cannot be initialized.
    pub async fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let backends = EngineBackends::sqlite(&config).await?;
        let engine = Self::new(config, backends)?;
        info!(model = %engine.config.llm.model, "chat engine ready");
        Ok(engine)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Project and conversation operations.
    #[must_use]
    pub const fn projects(&self) -> &ProjectService {
        &self.projects
    }

    /// Fork operations.
    #[must_use]
    pub const fn forks(&self) -> &ForkEngine {
        &self.forks
    }

    /// Merge operations.
    #[must_use]
    pub const fn merges(&self) -> &MergeEngine {
        &self.merges
    }

    /// Streaming response generation.
    #[must_use]
    pub const fn responses(&self) -> &ResponseGenerator {
        &self.responses
    }

    /// Branch tree projection.
    #[must_use]
    pub const fn tree(&self) -> &TreeBuilder {
        &self.tree
    }

    /// A sink sized from config, with its receiving end.
    #[must_use]
    pub fn chunk_channel(&self) -> (ChunkSink, tokio::sync::mpsc::Receiver<StreamEvent>) {
        ChunkSink::channel(self.config.stream.sink_capacity)
    }

    /// A summarization worker reading the configured topic.
    #[must_use]
    pub fn summary_worker(&self) -> SummaryWorker {
        let subscription = Subscription::new(
            Arc::clone(&self.queue),
            self.config.queue.summary_topic.clone(),
            Duration::from_millis(self.config.queue.poll_interval_ms),
        );
        SummaryWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.generator),
            subscription,
            self.config.llm.model.clone(),
        )
    }
}
