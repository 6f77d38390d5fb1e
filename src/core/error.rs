use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    /// Backend refused the call for quota reasons (HTTP 429 / RESOURCE_EXHAUSTED)
    #[error("Rate limited by {backend}: {message}")]
    RateLimited {
        backend: String,
        message: String,
        /// Server-suggested wait, when the payload carries one
        retry_after: Option<Duration>,
    },

    #[error("Rate limit retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Network error talking to {backend}: {hint}")]
    Network { backend: String, hint: String },

    #[error("Backend {backend} returned HTTP {status}: {body}")]
    Backend {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SwarmError {
    /// Only rate-limit failures are worth retrying
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SwarmError::RateLimited { .. })
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
