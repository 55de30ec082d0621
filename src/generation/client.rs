//! Generation client abstraction.

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;

use crate::core::errors::EngineResult;
use crate::generation::parts::{ContentPart, OutputConstraint};

/// Boxed future type for generation calls.
pub type GenFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Ordered text chunks of a streamed response. An `Err` item ends the stream.
pub type ChunkStream = BoxStream<'static, EngineResult<String>>;

/// Text generation backend.
pub trait GenerationClient: Send + Sync {
    /// Produce one complete response.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the backend call fails.
    fn generate(
        &self,
        model_hint: &str,
        parts: Vec<ContentPart>,
        constraint: OutputConstraint,
    ) -> GenFuture<'_, EngineResult<String>>;

    /// Start a streamed response.
    ///
    /// # Errors
    /// Returns `UpstreamFailed` if the request cannot be started.
    fn generate_stream(
        &self,
        model_hint: &str,
        parts: Vec<ContentPart>,
        constraint: OutputConstraint,
    ) -> GenFuture<'_, EngineResult<ChunkStream>>;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-process generator that replays queued responses.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::stream;

    use super::{ChunkStream, GenFuture, GenerationClient};
    use crate::core::errors::{EngineError, EngineResult};
    use crate::generation::parts::{ContentPart, OutputConstraint};

    /// One scripted streaming reply.
    pub enum StreamScript {
        /// Emit these chunks then finish.
        Chunks(Vec<String>),
        /// Emit these chunks then fail.
        FailAfter(Vec<String>),
        /// Fail before the first chunk.
        Refuse,
    }

    /// Recorded call.
    #[derive(Clone, Debug)]
    pub struct Call {
        pub parts: Vec<ContentPart>,
        pub constraint: OutputConstraint,
    }

    #[derive(Default)]
    pub struct ScriptedGenerator {
        replies: Mutex<VecDeque<EngineResult<String>>>,
        streams: Mutex<VecDeque<StreamScript>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedGenerator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, text: &str) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.to_string()));
            self
        }

        pub fn fail(self, reason: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(EngineError::UpstreamFailed(reason.to_string())));
            self
        }

        pub fn stream(self, script: StreamScript) -> Self {
            self.streams.lock().unwrap().push_back(script);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, parts: Vec<ContentPart>, constraint: OutputConstraint) {
            self.calls.lock().unwrap().push(Call { parts, constraint });
        }
    }

    impl GenerationClient for ScriptedGenerator {
        fn generate(
            &self,
            _model_hint: &str,
            parts: Vec<ContentPart>,
            constraint: OutputConstraint,
        ) -> GenFuture<'_, EngineResult<String>> {
            self.record(parts, constraint);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::UpstreamFailed("no scripted reply".into())));
            Box::pin(async move { reply })
        }

        fn generate_stream(
            &self,
            _model_hint: &str,
            parts: Vec<ContentPart>,
            constraint: OutputConstraint,
        ) -> GenFuture<'_, EngineResult<ChunkStream>> {
            self.record(parts, constraint);
            let script = self.streams.lock().unwrap().pop_front();
            Box::pin(async move {
                let items: Vec<EngineResult<String>> = match script {
                    Some(StreamScript::Chunks(chunks)) => chunks.into_iter().map(Ok).collect(),
                    Some(StreamScript::FailAfter(chunks)) => chunks
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(EngineError::UpstreamFailed(
                            "stream broke".to_string(),
                        ))))
                        .collect(),
                    Some(StreamScript::Refuse) | None => {
                        return Err(EngineError::UpstreamFailed("refused".to_string()));
                    }
                };
                let stream: ChunkStream = Box::pin(stream::iter(items));
                Ok(stream)
            })
        }
    }
}
