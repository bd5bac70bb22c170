//! Configuration loading for the RAG chat orchestrator.
//!
//! Settings are layered from `config/default.{toml,yaml}`, an optional
//! per-environment override, and `RAGCHAT__`-prefixed environment
//! variables, via the `config` crate.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, BackendConfig, LlmType, ObservabilityConfig, RagChatConfig, RuntimeEnvironment,
    ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
