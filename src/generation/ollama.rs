//! Ollama-backed generation client.
//!
//! Both complete and streamed responses go through the `rig` Ollama
//! provider; the two share one request builder.

use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::{CompletionError, CompletionModel, CompletionRequest};
use rig::message::{AssistantContent, Message as RigMessage};
use rig::providers::ollama;
use rig::streaming::StreamedAssistantContent;
use serde_json::json;
use tracing::debug;

use crate::core::config::LlmConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::generation::client::{ChunkStream, GenFuture, GenerationClient};
use crate::generation::parts::{ContentPart, OutputConstraint, PartRole};

/// Generation client talking to an Ollama server.
#[derive(Clone)]
pub struct OllamaGenerator {
    client: ollama::Client<ReqwestClient>,
    default_model: String,
    temperature: f64,
}

impl OllamaGenerator {
    /// Build a generator from config.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or a client cannot be built.
    pub fn new(config: &LlmConfig) -> EngineResult<Self> {
        let http = ReqwestClient::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let builder = ollama::Client::<ReqwestClient>::builder()
            .api_key(rig::client::Nothing)
            .http_client(http);
        let builder = if let Some(base_url) = &config.base_url {
            url::Url::parse(base_url)?;
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(EngineError::from)?;

        Ok(Self {
            client,
            default_model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn model_name(&self, hint: &str) -> String {
        if hint.trim().is_empty() {
            self.default_model.clone()
        } else {
            hint.to_string()
        }
    }
}

impl GenerationClient for OllamaGenerator {
    fn generate(
        &self,
        model_hint: &str,
        parts: Vec<ContentPart>,
        constraint: OutputConstraint,
    ) -> GenFuture<'_, EngineResult<String>> {
        let model_name = self.model_name(model_hint);
        Box::pin(async move {
            debug!(model = %model_name, parts = parts.len(), "generation request");
            let model = self.client.completion_model(model_name);
            let request = build_request(&model, parts, constraint, self.temperature)?;
            let response = model.completion(request).await?;
            Ok(extract_text(&response.choice))
        })
    }

    fn generate_stream(
        &self,
        model_hint: &str,
        parts: Vec<ContentPart>,
        constraint: OutputConstraint,
    ) -> GenFuture<'_, EngineResult<ChunkStream>> {
        let model_name = self.model_name(model_hint);
        Box::pin(async move {
            debug!(model = %model_name, parts = parts.len(), "streaming request");
            let model = self.client.completion_model(model_name);
            let request = build_request(&model, parts, constraint, self.temperature)?;
            let response = model.stream(request).await?;
            Ok(text_chunks(Box::pin(response)))
        })
    }
}

/// Last part becomes the prompt, the rest the chat history.
fn build_request<M: CompletionModel>(
    model: &M,
    parts: Vec<ContentPart>,
    constraint: OutputConstraint,
    temperature: f64,
) -> EngineResult<CompletionRequest> {
    let mut history: Vec<RigMessage> = parts.into_iter().map(to_rig_message).collect();
    let prompt = history
        .pop()
        .ok_or_else(|| EngineError::ValidationFailed("empty prompt".to_string()))?;

    let builder = model
        .completion_request(prompt)
        .messages(history)
        .temperature(temperature);
    let builder = match constraint {
        OutputConstraint::Json => builder.additional_params(json!({ "format": "json" })),
        OutputConstraint::Text => builder,
    };
    Ok(builder.build())
}

fn to_rig_message(part: ContentPart) -> RigMessage {
    match part.role {
        PartRole::User => RigMessage::user(part.text),
        PartRole::Model => RigMessage::assistant(part.text),
    }
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

/// Keep the text deltas of a streamed completion.
///
/// The stream must end with the provider's final response; ending without
/// one means the reply was cut off and yields an error.
fn text_chunks<S, R>(stream: S) -> ChunkStream
where
    S: Stream<Item = Result<StreamedAssistantContent<R>, CompletionError>>
        + Unpin
        + Send
        + 'static,
    R: Send + 'static,
{
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        loop {
            match stream.next().await {
                Some(Ok(StreamedAssistantContent::Text(text))) if text.text.is_empty() => {}
                Some(Ok(StreamedAssistantContent::Text(text))) => {
                    return Some((Ok(text.text), Some(stream)));
                }
                Some(Ok(StreamedAssistantContent::Final(_))) => return None,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Some((Err(EngineError::from(err)), None)),
                None => {
                    return Some((
                        Err(EngineError::UpstreamFailed(
                            "stream ended before completion".to_string(),
                        )),
                        None,
                    ));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    type Item = Result<StreamedAssistantContent<()>, CompletionError>;

    fn text(chunk: &str) -> Item {
        Ok(StreamedAssistantContent::text(chunk))
    }

    async fn collect(items: Vec<Item>) -> Vec<EngineResult<String>> {
        text_chunks(stream::iter(items)).collect().await
    }

    #[tokio::test]
    async fn text_deltas_are_relayed_until_final() {
        let items = collect(vec![
            text("Hel"),
            text(""),
            Ok(StreamedAssistantContent::ReasoningDelta {
                id: None,
                reasoning: "thinking".to_string(),
            }),
            text("lo"),
            Ok(StreamedAssistantContent::Final(())),
            text("ignored"),
        ])
        .await;
        let chunks: Vec<String> = items.into_iter().map(|item| item.unwrap()).collect();
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn missing_final_response_is_an_error() {
        let items = collect(vec![text("Hel")]).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(EngineError::UpstreamFailed(_))));
    }

    #[tokio::test]
    async fn provider_error_ends_the_stream() {
        let items = collect(vec![
            text("a"),
            Err(CompletionError::ProviderError("boom".to_string())),
            text("b"),
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(EngineError::UpstreamFailed(_))));
    }

    #[test]
    fn last_part_is_the_prompt() {
        let config = LlmConfig::default();
        let generator = OllamaGenerator::new(&config).unwrap();
        let model = generator.client.completion_model("m");
        let request = build_request(
            &model,
            vec![
                ContentPart::user("earlier"),
                ContentPart::model("answer"),
                ContentPart::user("now"),
            ],
            OutputConstraint::Json,
            0.1,
        )
        .unwrap();
        assert_eq!(request.chat_history.len(), 3);
        assert_eq!(request.additional_params, Some(json!({ "format": "json" })));
        assert!(matches!(
            build_request(&model, Vec::new(), OutputConstraint::Text, 0.1),
            Err(EngineError::ValidationFailed(_))
        ));
    }
}
