//! Error types for the chat client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication failed (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Unexpected response (HTTP {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Push channel unavailable: {0}")]
    PushUnavailable(String),

    #[error("STOMP protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// True when the caller should send the user back to login.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Unauthorized { .. })
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
