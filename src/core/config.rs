//! Configuration for the conversation engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{EngineError, EngineResult};

/// Environment variable naming a JSON config file to start from.
pub const CONFIG_PATH_ENV: &str = "FORKLINE_CONFIG";
/// Environment variable overriding the `SQLite` database path.
pub const DB_PATH_ENV: &str = "FORKLINE_DB";
/// Environment variable overriding the Ollama base URL.
pub const OLLAMA_URL_ENV: &str = "FORKLINE_OLLAMA_URL";
/// Environment variable overriding the completion model.
pub const MODEL_ENV: &str = "FORKLINE_MODEL";
/// Environment variable overriding the HTTP port.
pub const PORT_ENV: &str = "FORKLINE_PORT";
/// Environment variable overriding the log level.
pub const LOG_ENV: &str = "FORKLINE_LOG";

/// Top-level configuration for the engine and its host process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion model settings.
    pub llm: LlmConfig,
    /// Task queue settings.
    pub queue: QueueConfig,
    /// Tree layout hints.
    pub layout: LayoutConfig,
    /// Streaming sink settings.
    pub stream: StreamConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> EngineResult<()> {
        if self.llm.model.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "llm.request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.queue.summary_topic.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "queue.summary_topic must not be empty".to_string(),
            ));
        }

        if self.queue.poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "queue.poll_interval_ms must be > 0".to_string(),
            ));
        }

        if self.queue.visibility_timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "queue.visibility_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.stream.sink_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "stream.sink_capacity must be > 0".to_string(),
            ));
        }

        if !self.layout.fork_horizontal_spacing.is_finite()
            || !self.layout.message_vertical_spacing.is_finite()
        {
            return Err(EngineError::InvalidConfig(
                "layout spacings must be finite".to_string(),
            ));
        }

        if let Some(base_url) = &self.llm.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }

    /// Load configuration from an optional JSON file, then apply environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if an override is invalid.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var(OLLAMA_URL_ENV) {
            config.llm.base_url = Some(url);
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.llm.model = model;
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            config.server.port = port.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("{PORT_ENV}={port} is not a port"))
            })?;
        }
        if let Ok(level) = std::env::var(LOG_ENV) {
            config.server.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file. Missing sections fall back to defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            EngineError::InvalidConfig(format!("cannot parse {}: {err}", path.display()))
        })
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("forkline.sqlite"),
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model name passed to the generation client.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Timeout for a single generation request.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "ministral-3:8b-instruct-2512-q8_0".to_string(),
            temperature: 0.4,
            base_url: None,
            request_timeout_secs: 120,
        }
    }
}

/// Task queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Topic that carries summarization tasks.
    pub summary_topic: String,
    /// How often an idle subscription polls for new tasks.
    pub poll_interval_ms: u64,
    /// A claimed task that is neither acked nor nacked becomes visible again after this.
    pub visibility_timeout_secs: u64,
    /// Delay before a nacked task is redelivered.
    pub retry_backoff_ms: u64,
    /// Park a task as dead after this many failed attempts (0 = retry forever).
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            summary_topic: "chat_summary".to_string(),
            poll_interval_ms: 1000,
            visibility_timeout_secs: 300,
            retry_backoff_ms: 5000,
            max_attempts: 0,
        }
    }
}

/// Layout hints written next to conversations and messages for the tree view.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Horizontal offset per existing conversation when placing a fork.
    pub fork_horizontal_spacing: f64,
    /// Vertical offset per assistant message within a conversation.
    pub message_vertical_spacing: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            fork_horizontal_spacing: 250.0,
            message_vertical_spacing: 200.0,
        }
    }
}

/// Streaming sink settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bounded buffer between the generator and the consumer.
    pub sink_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { sink_capacity: 32 }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Default log directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.summary_topic, "chat_summary");
        assert!((config.layout.fork_horizontal_spacing - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = EngineConfig::default();
        config.queue.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let mut config = EngineConfig::default();
        config.llm.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"queue": {"poll_interval_ms": 50}}"#).unwrap();
        assert_eq!(config.queue.poll_interval_ms, 50);
        assert_eq!(config.queue.summary_topic, "chat_summary");
        assert_eq!(config.server.port, 3000);
    }
}
