// ================================================================
// File: relaybot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Non-2xx status, an `error` body, or a response we could not make sense of.
    #[error("Completion API error: {0}")]
    Completion(String),

    #[error("Completion returned no content")]
    EmptyCompletion,

    #[error("Global rate limit reached")]
    RateLimited,

    #[error("Completion circuit is open")]
    CircuitOpen,
}

impl Error {
    /// Rejections that an HTTP-style caller should surface as "too many requests".
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::RateLimited | Error::CircuitOpen)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}
