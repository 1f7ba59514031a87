use crate::core::error::ChatError;
use crate::core::tokens::{estimate_tokens, format_token_count, TokenQuota};

/// Running token total for the current conversation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageTracker {
    cumulative: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tokens` to the running total and return the new total.
    pub fn add(&mut self, tokens: i64) -> Result<u64, ChatError> {
        let tokens = u64::try_from(tokens).map_err(|_| {
            ChatError::InvalidInput(format!("token increment must not be negative: {tokens}"))
        })?;
        self.cumulative = self.cumulative.saturating_add(tokens);
        Ok(self.cumulative)
    }

    /// Add the estimate for `text` and return the increment that was applied.
    pub fn record_text(&mut self, text: &str) -> u64 {
        let tokens = estimate_tokens(text);
        self.cumulative = self.cumulative.saturating_add(tokens);
        tokens
    }

    pub fn reset(&mut self) {
        self.cumulative = 0;
    }

    pub fn cumulative(&self) -> u64 {
        self.cumulative
    }
}

/// Snapshot of the numbers a usage bar displays.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub draft_tokens: u64,
    pub session_tokens: u64,
    pub message_count: usize,
    pub quota_remaining: u64,
    pub quota_used_percent: f64,
}

impl UsageSummary {
    pub fn new(draft: &str, usage: &UsageTracker, message_count: usize, quota: &TokenQuota) -> Self {
        Self {
            draft_tokens: estimate_tokens(draft),
            session_tokens: usage.cumulative(),
            message_count,
            quota_remaining: quota.remaining(),
            quota_used_percent: quota.usage_percentage(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "Current: {} tokens | Session: {} tokens | {} messages | Quota: {} left ({:.1}% used)",
            format_token_count(self.draft_tokens),
            format_token_count(self.session_tokens),
            self.message_count,
            format_token_count(self.quota_remaining),
            self.quota_used_percent,
        )
    }
}
