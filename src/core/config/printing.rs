use crate::core::config::data::Config;

impl Config {
    /// Render the effective configuration, one `key: value` line per setting.
    pub fn describe(&self) -> String {
        let mut lines = vec!["Current configuration:".to_string()];
        lines.push(format!("  base-url: {}", self.base_url()));
        match &self.default_model {
            Some(model) => lines.push(format!("  default-model: {model}")),
            None => lines.push("  default-model: (unset)".to_string()),
        }
        if self.enabled_models.is_empty() {
            lines.push("  enabled-models: (built-in defaults)".to_string());
        } else {
            lines.push(format!("  enabled-models: {}", self.enabled_models.join(", ")));
        }
        match self.stream_timeout() {
            Some(timeout) => lines.push(format!("  stream-timeout: {}s", timeout.as_secs())),
            None => lines.push("  stream-timeout: (none)".to_string()),
        }
        if let Some(remaining) = self.tokens_remaining {
            lines.push(format!("  tokens-remaining: {remaining}"));
        }
        match &self.transcript_log {
            Some(path) => lines.push(format!("  transcript-log: {path}")),
            None => lines.push("  transcript-log: (disabled)".to_string()),
        }
        lines.join("\n")
    }
}
