//! Client error types

use thiserror::Error;

/// Errors from the orchestrator HTTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ClientError {
    pub fn api_error(status: u16, message: String) -> Self {
        ClientError::Api { status, message }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
