//! Selects the configured LLM backend and tracks its reachability.
//!
//! `available()` is a cheap synchronous read backed by a cached bit;
//! the registry refreshes that bit on construction and, if an interval is
//! configured, on a recurring background task. Callers that need an
//! up-to-date answer before the first scheduled probe should call
//! [`BackendRegistry::refresh`] directly.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use ragchat_config::{BackendConfig, LlmType, RagChatConfig};
use ragchat_core::BackendAvailability;

use crate::backend::{GeminiBackend, LlmBackend, OllamaBackend, OpenAiBackend};
use crate::LlmError;

pub struct BackendRegistry {
    enabled: bool,
    active: Option<Arc<dyn LlmBackend>>,
    available: Arc<RwLock<BackendAvailability>>,
}

impl BackendRegistry {
    /// Builds the driver for `config.llm_type` (if any) and performs a
    /// synchronous first probe so `available()` is meaningful immediately.
    pub async fn new(config: &RagChatConfig) -> Result<Self, LlmError> {
        let active = Self::build_backend(config)?;
        let available = Arc::new(RwLock::new(BackendAvailability::unknown()));

        if let Some(backend) = &active {
            let is_available = backend.check_availability().await;
            tracing::info!(backend = backend.name(), available = is_available, "initial backend availability probe");
            available.write().set(is_available);
        }

        Ok(Self { enabled: config.enabled, active, available })
    }

    fn build_backend(config: &RagChatConfig) -> Result<Option<Arc<dyn LlmBackend>>, LlmError> {
        if !config.enabled {
            return Ok(None);
        }

        let backend: Arc<dyn LlmBackend> = match config.llm_type {
            LlmType::None => return Ok(None),
            LlmType::Ollama => Arc::new(Self::build_ollama(&config.ollama)?),
            LlmType::Openai => Arc::new(Self::build_openai(&config.openai)?),
            LlmType::Gemini => Arc::new(Self::build_gemini(&config.gemini)?),
        };

        Ok(Some(backend))
    }

    fn build_ollama(cfg: &BackendConfig) -> Result<OllamaBackend, LlmError> {
        OllamaBackend::new(cfg.api_url.clone(), cfg.model.clone(), Duration::from_secs(cfg.timeout_seconds))
    }

    fn build_openai(cfg: &BackendConfig) -> Result<OpenAiBackend, LlmError> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Configuration("openai backend requires an api_key".to_string()))?;
        OpenAiBackend::new(cfg.api_url.clone(), api_key, cfg.model.clone(), Duration::from_secs(cfg.timeout_seconds))
    }

    fn build_gemini(cfg: &BackendConfig) -> Result<GeminiBackend, LlmError> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Configuration("gemini backend requires an api_key".to_string()))?;
        GeminiBackend::new(cfg.api_url.clone(), api_key, cfg.model.clone(), Duration::from_secs(cfg.timeout_seconds))
    }

    /// Builds a registry around an already-constructed backend, bypassing
    /// config-driven dispatch. Used by integration tests that script a fake
    /// backend rather than talk to a real provider.
    pub fn with_backend(backend: Arc<dyn LlmBackend>, available: bool) -> Self {
        let mut state = BackendAvailability::unknown();
        state.set(available);
        Self { enabled: true, active: Some(backend), available: Arc::new(RwLock::new(state)) }
    }

    /// The driver to dispatch RAG chat calls to, or `None` if the feature
    /// is disabled or the configured backend is `none`.
    pub fn active(&self) -> Option<&Arc<dyn LlmBackend>> {
        self.active.as_ref()
    }

    /// Whether the feature is enabled, a backend is configured, and that
    /// backend's last probe reported reachable.
    pub fn available(&self) -> bool {
        self.enabled && self.active.is_some() && self.available.read().get().unwrap_or(false)
    }

    /// Re-probes the active backend and updates the cached bit, logging a
    /// state transition at info level.
    pub async fn refresh(&self) {
        let Some(backend) = &self.active else { return };
        let is_available = backend.check_availability().await;
        let previous = self.available.read().get();
        if previous != Some(is_available) {
            tracing::info!(
                backend = backend.name(),
                previous = ?previous,
                now = is_available,
                "backend availability changed"
            );
        }
        self.available.write().set(is_available);
    }

    /// Spawns the periodic re-probe task. `interval_secs <= 0` disables
    /// scheduling entirely, matching the "synchronous only" configuration.
    pub fn spawn_periodic_refresh(self: &Arc<Self>, interval_secs: i64) -> Option<tokio::task::JoinHandle<()>> {
        if interval_secs <= 0 || self.active.is_none() {
            return None;
        }

        let registry = Arc::clone(self);
        let period = Duration::from_secs(interval_secs as u64);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it, `new` already probed once
            loop {
                ticker.tick().await;
                registry.refresh().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_config_yields_no_active_backend() {
        let config = RagChatConfig::default();
        let registry = BackendRegistry::new(&config).await.unwrap();
        assert!(registry.active().is_none());
        assert!(!registry.available());
    }

    #[tokio::test]
    async fn openai_without_api_key_fails_to_build() {
        let mut config = RagChatConfig::default();
        config.enabled = true;
        config.llm_type = LlmType::Openai;
        config.openai.api_url = "https://api.openai.com/v1".to_string();
        let result = BackendRegistry::new(&config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_interval_disables_periodic_refresh() {
        let config = RagChatConfig::default();
        let registry = Arc::new(BackendRegistry::new(&config).await.unwrap());
        assert!(registry.spawn_periodic_refresh(0).is_none());
    }
}
