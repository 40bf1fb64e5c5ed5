use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Errors returned by platform calls.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("bot token was rejected by the platform")]
    Unauthorized,

    #[error("missing access: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("platform server error: {0}")]
    Server(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid platform response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Network("request timed out".to_string())
        } else if err.is_connect() {
            PlatformError::Network("failed to connect to platform".to_string())
        } else if err.is_decode() {
            PlatformError::InvalidResponse(err.to_string())
        } else {
            PlatformError::Network(err.to_string())
        }
    }
}
