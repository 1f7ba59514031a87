use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of an OpenAI-compatible chat completions API
    pub base_url: Option<String>,
    /// Model selected at startup
    pub default_model: Option<String>,
    /// Models offered for selection; empty means the built-in popular set
    #[serde(default)]
    pub enabled_models: Vec<String>,
    /// Fail a reply when no fragment arrives for this many seconds
    pub stream_timeout_secs: Option<u64>,
    /// Remaining provider token balance, as last entered by the user
    pub tokens_remaining: Option<u64>,
    /// Append finished turns to this file
    pub transcript_log: Option<String>,
}

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
