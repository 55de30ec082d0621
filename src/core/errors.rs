//! Error types for the conversation engine.

use thiserror::Error;

/// Engine error type.
///
/// Variants follow the caller-facing taxonomy: the first three describe a
/// problem with the request (client errors), the rest describe a failure of
/// a collaborator (server errors).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A conversation, message, project or target is absent.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// The records exist but are in the wrong state for the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Malformed caller input.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// Generation client or task queue call errored.
    #[error("upstream failed: {0}")]
    UpstreamFailed(String),
    /// Structured generation output could not be parsed.
    #[error("malformed generation output: {0}")]
    MalformedOutput(String),
    /// Store read or write error.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Build a `NotFound` error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Neither a running summary nor any history exists to ground a response.
    #[must_use]
    pub fn empty_context() -> Self {
        Self::InvalidState("empty context: no summary and no message history".to_string())
    }

    /// The first response requires exactly one seed message.
    #[must_use]
    pub fn invalid_seed_state(found: usize) -> Self {
        Self::InvalidState(format!(
            "invalid seed state: expected exactly one initial message, found {found}"
        ))
    }

    /// Merge was requested for a conversation that was not produced by a fork.
    pub fn not_forkable(id: impl ToString) -> Self {
        Self::InvalidState(format!(
            "conversation {} has no source message and cannot be merged",
            id.to_string()
        ))
    }

    /// Whether the error is caused by the request rather than a collaborator.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidState(_) | Self::ValidationFailed(_)
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for EngineError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamFailed(err.to_string())
    }
}

impl From<rig::completion::CompletionError> for EngineError {
    fn from(err: rig::completion::CompletionError) -> Self {
        Self::UpstreamFailed(err.to_string())
    }
}

impl From<rig::http_client::Error> for EngineError {
    fn from(err: rig::http_client::Error) -> Self {
        Self::UpstreamFailed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedOutput(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Convenience result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
