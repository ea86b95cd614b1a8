//! Provider error types.

use thiserror::Error;

/// Errors surfaced by embedding and chat providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider did not answer within the configured deadline.
    #[error("provider call timed out")]
    Timeout,

    /// The provider reported a failure (network, rate limit, server error).
    /// This is the only retryable kind.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider answered, but the reply could not be interpreted.
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Provider(_))
    }
}
