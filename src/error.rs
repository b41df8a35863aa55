//! Error types for the gateway.

use thiserror::Error;

use crate::translate::openai_types::ErrorEnvelope;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Thinking budget too low: max_tokens must be greater than 16384, got {max_tokens}")]
    ThinkingBudget { max_tokens: u64 },

    #[error("Upstream returned status {status}: {}", .envelope.error.message)]
    Upstream { status: u16, envelope: ErrorEnvelope },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status this error maps to when surfaced before streaming starts.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Auth { .. } => 401,
            Self::Validation { .. } | Self::ThinkingBudget { .. } => 400,
            Self::Upstream { status, .. } => *status,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
