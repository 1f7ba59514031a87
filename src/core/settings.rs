use std::time::Duration;

use crate::core::config::data::Config;

pub const DEFAULT_MODEL: &str = "gpt-5-nano";

/// Models enabled when the configuration does not list any.
pub const DEFAULT_ENABLED_MODELS: &[&str] = &[
    "gpt-5-nano",
    "claude-3-5-sonnet-latest",
    "gemini-2.0-flash",
    "grok-3-mini-fast",
    "mistral-large-latest",
    "deepseek-chat",
];

/// Model preferences injected into a streaming session.
///
/// The selected model is read once per submission; replacing the settings
/// while a reply streams only affects the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    enabled_models: Vec<String>,
    selected_model: String,
    stream_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::new(
            DEFAULT_ENABLED_MODELS.iter().map(|m| m.to_string()).collect(),
            DEFAULT_MODEL,
        )
    }
}

impl SessionSettings {
    pub fn new(enabled_models: Vec<String>, selected_model: impl Into<String>) -> Self {
        let mut selected_model = selected_model.into();
        if selected_model.trim().is_empty() {
            selected_model = enabled_models
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        }
        Self {
            enabled_models,
            selected_model,
            stream_timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let enabled = if config.enabled_models.is_empty() {
            DEFAULT_ENABLED_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            config.enabled_models.clone()
        };
        let selected = config.default_model.clone().unwrap_or_default();
        Self::new(enabled, selected).with_stream_timeout(config.stream_timeout())
    }

    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn enabled_models(&self) -> &[String] {
        &self.enabled_models
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout
    }

    pub fn is_enabled(&self, model_id: &str) -> bool {
        self.enabled_models.iter().any(|m| m == model_id)
    }

    /// Select `model_id` for subsequent submissions. The id is passed through
    /// to the backend unchecked; only blank ids are ignored.
    pub fn select_model(&mut self, model_id: &str) -> bool {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return false;
        }
        self.selected_model = model_id.to_string();
        true
    }
}
