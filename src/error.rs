//! Error types for the lay engine.

use thiserror::Error;

/// Errors surfaced by the engine and its exchange client.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Authentication with the exchange failed or the session is invalid.
    #[error("auth error: {0}")]
    Auth(String),

    /// The exchange returned an application-level error.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// HTTP-level failure (network, timeout, non-2xx).
    #[error("http error: {0}")]
    Http(String),

    /// Request timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Rate limited by the exchange.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// A response was missing fields or had the wrong shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// An order was rejected by the exchange.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Configuration value out of range or otherwise invalid.
    #[error("config error: {0}")]
    Config(String),

    /// State persistence failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Control operation precondition failed.
    #[error("{0}")]
    Control(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True when the retry ladder (1s/2s/4s, 3 attempts) should apply.
    /// Auth failures and malformed responses are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout(_) | Self::RateLimit(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                Self::RateLimit(err.to_string())
            } else if status.is_server_error() {
                Self::Http(err.to_string())
            } else {
                Self::Exchange(err.to_string())
            }
        } else {
            Self::Http(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::Http("502".into()).is_transient());
        assert!(EngineError::Timeout("slow".into()).is_transient());
        assert!(EngineError::RateLimit("429".into()).is_transient());
        assert!(!EngineError::Auth("expired".into()).is_transient());
        assert!(!EngineError::Malformed("missing field".into()).is_transient());
        assert!(!EngineError::OrderRejected("INSUFFICIENT_FUNDS".into()).is_transient());
    }

    #[test]
    fn auth_classification() {
        assert!(EngineError::Auth("bad credentials".into()).is_auth());
        assert!(!EngineError::Http("502".into()).is_auth());
    }
}
