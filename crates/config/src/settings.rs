//! Application settings tree and loader.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, rag_chat};
use crate::ConfigError;

/// Which backend the façade dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    #[default]
    None,
    Ollama,
    Openai,
    Gemini,
}

/// Per-backend connection settings. Unused fields for a given backend
/// (e.g. `api_key` for Ollama) are simply ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_seconds: u64,
}

fn default_backend_timeout_secs() -> u64 {
    rag_chat::BACKEND_TIMEOUT_SECS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: None,
            model: String::new(),
            timeout_seconds: default_backend_timeout_secs(),
        }
    }
}

impl BackendConfig {
    fn default_ollama() -> Self {
        Self { api_url: endpoints::OLLAMA_DEFAULT.clone(), ..Self::default() }
    }

    fn default_openai() -> Self {
        Self { api_url: endpoints::OPENAI_DEFAULT.clone(), ..Self::default() }
    }

    fn default_gemini() -> Self {
        Self { api_url: endpoints::GEMINI_DEFAULT.clone(), ..Self::default() }
    }
}

/// The RAG chat feature tree: whether it's on, which backend drives it,
/// and every tuning knob the façade and orchestrator read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagChatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub llm_type: LlmType,

    #[serde(default = "BackendConfig::default_ollama")]
    pub ollama: BackendConfig,
    #[serde(default = "BackendConfig::default_openai")]
    pub openai: BackendConfig,
    #[serde(default = "BackendConfig::default_gemini")]
    pub gemini: BackendConfig,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_context_max_documents")]
    pub context_max_documents: usize,
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_evaluation_max_relevant_docs")]
    pub evaluation_max_relevant_docs: usize,
    #[serde(default = "default_history_max_messages")]
    pub history_max_messages: usize,

    /// Base system prompt shared by the answer/FAQ/summary primitives when
    /// no primitive-specific template is configured.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Seconds between availability probes; `<= 0` disables the periodic
    /// probe and falls back to a synchronous check on first use.
    #[serde(default = "default_availability_check_interval")]
    pub availability_check_interval_secs: i64,

    /// Field list requested when fetching full document content.
    #[serde(default = "default_content_fields")]
    pub content_fields: Vec<String>,
}

fn default_temperature() -> f32 {
    rag_chat::TEMPERATURE
}
fn default_max_tokens() -> u32 {
    rag_chat::MAX_TOKENS
}
fn default_context_max_documents() -> usize {
    rag_chat::CONTEXT_MAX_DOCUMENTS
}
fn default_context_max_chars() -> usize {
    rag_chat::CONTEXT_MAX_CHARS
}
fn default_evaluation_max_relevant_docs() -> usize {
    rag_chat::EVALUATION_MAX_RELEVANT_DOCS
}
fn default_history_max_messages() -> usize {
    rag_chat::HISTORY_MAX_MESSAGES
}
fn default_availability_check_interval() -> i64 {
    rag_chat::AVAILABILITY_CHECK_INTERVAL_SECS
}
fn default_content_fields() -> Vec<String> {
    vec!["content".to_string()]
}

impl Default for RagChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            llm_type: LlmType::default(),
            ollama: BackendConfig::default_ollama(),
            openai: BackendConfig::default_openai(),
            gemini: BackendConfig::default_gemini(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_max_documents: default_context_max_documents(),
            context_max_chars: default_context_max_chars(),
            evaluation_max_relevant_docs: default_evaluation_max_relevant_docs(),
            history_max_messages: default_history_max_messages(),
            system_prompt: None,
            availability_check_interval_secs: default_availability_check_interval(),
            content_fields: default_content_fields(),
        }
    }
}

impl RagChatConfig {
    /// The currently selected backend's connection settings, or `None`
    /// when `llm_type` is `None`.
    pub fn active_backend(&self) -> Option<&BackendConfig> {
        match self.llm_type {
            LlmType::None => None,
            LlmType::Ollama => Some(&self.ollama),
            LlmType::Openai => Some(&self.openai),
            LlmType::Gemini => Some(&self.gemini),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), json: false }
    }
}

/// The complete application settings tree.
///
/// `Settings::default()` is always valid and inert: RAG chat disabled,
/// backend `none`, so the server can start with zero configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub rag_chat: RagChatConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }

        if self.rag_chat.enabled && self.rag_chat.llm_type == LlmType::None {
            return Err(ConfigError::MissingField("rag_chat.llm_type".to_string()));
        }

        if self.rag_chat.enabled {
            if let Some(backend) = self.rag_chat.active_backend() {
                if backend.api_url.is_empty() {
                    return Err(ConfigError::MissingField("rag_chat.<backend>.api_url".to_string()));
                }
                let needs_key = matches!(self.rag_chat.llm_type, LlmType::Openai | LlmType::Gemini);
                if needs_key && backend.api_key.is_none() {
                    return Err(ConfigError::MissingField("rag_chat.<backend>.api_key".to_string()));
                }
            }
        }

        if !(0.0..=2.0).contains(&self.rag_chat.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "rag_chat.temperature".to_string(),
                message: format!("must be between 0.0 and 2.0, got {}", self.rag_chat.temperature),
            });
        }

        Ok(())
    }
}

/// Loads settings from `config/default.{toml,yaml}`, an optional
/// `config/{env}.{toml,yaml}` override, then `RAGCHAT__`-prefixed
/// environment variables, in increasing precedence order.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("RAGCHAT").separator("__").try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid_and_inert() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.rag_chat.enabled);
        assert_eq!(settings.rag_chat.llm_type, LlmType::None);
    }

    #[test]
    fn enabling_rag_chat_without_backend_fails_validation() {
        let mut settings = Settings::default();
        settings.rag_chat.enabled = true;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn enabling_openai_without_api_key_fails_validation() {
        let mut settings = Settings::default();
        settings.rag_chat.enabled = true;
        settings.rag_chat.llm_type = LlmType::Openai;
        settings.rag_chat.openai.api_url = "https://api.openai.com/v1".to_string();
        assert!(settings.validate().is_err());

        settings.rag_chat.openai.api_key = Some("sk-test".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn ollama_needs_no_api_key() {
        let mut settings = Settings::default();
        settings.rag_chat.enabled = true;
        settings.rag_chat.llm_type = LlmType::Ollama;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_temperature_is_rejected() {
        let mut settings = Settings::default();
        settings.rag_chat.temperature = 3.0;
        assert!(settings.validate().is_err());
    }
}
