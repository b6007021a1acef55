use thiserror::Error;

/// Errors surfaced by a certification source or one of its decorators.
///
/// A confirmed "no such record" is not an error: lookups return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The source rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Network failure or an unparseable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source itself throttled the request.
    #[error("rate limited by source: {0}")]
    RateLimited(String),

    /// The caller gave up while waiting for a rate-limit token.
    #[error("lookup cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same lookup later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited(_))
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::RateLimited(_) => "rate_limited",
            Self::Cancelled => "cancelled",
        }
    }
}
