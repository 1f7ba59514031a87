//! Token accounting helpers.
//!
//! Counts are approximations: one token per four characters, rounded up.
//! Nothing here tries to match a real tokenizer.

use crate::core::error::ChatError;

/// Upper bound of the provider balance a user can record.
pub const MAX_QUOTA_TOKENS: u64 = 50_000_000;

/// Estimate the token count of `text` as `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Abbreviate a token count for display (`1.5M`, `12.0K`, `999`).
pub fn format_token_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

/// User-maintained remaining balance with the provider.
///
/// The balance is entered by hand; the client never decrements it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenQuota {
    remaining: u64,
}

impl Default for TokenQuota {
    fn default() -> Self {
        Self {
            remaining: MAX_QUOTA_TOKENS,
        }
    }
}

impl TokenQuota {
    /// Build a quota from a stored value, ignoring values outside the valid range.
    pub fn from_stored(stored: Option<u64>) -> Self {
        let mut quota = Self::default();
        if let Some(value) = stored {
            let _ = quota.set_remaining(value);
        }
        quota
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn set_remaining(&mut self, remaining: u64) -> Result<(), ChatError> {
        if remaining > MAX_QUOTA_TOKENS {
            return Err(ChatError::InvalidInput(format!(
                "token balance must be between 0 and {MAX_QUOTA_TOKENS}"
            )));
        }
        self.remaining = remaining;
        Ok(())
    }

    pub fn usage_percentage(&self) -> f64 {
        (MAX_QUOTA_TOKENS - self.remaining) as f64 / MAX_QUOTA_TOKENS as f64 * 100.0
    }
}
