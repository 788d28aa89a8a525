use thiserror::Error;

/// Failure taxonomy for every manager operation. Nothing here is fatal:
/// the worst outcome anywhere is a forced return to the anonymous state.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally before any network call was issued.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request could not complete at the transport layer.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success response with a server-provided (or fallback) message.
    #[error("server rejected request: {0}")]
    Api(String),

    /// The server signalled that the bearer token was revoked. Never
    /// surfaced as a generic error; it forces logout instead.
    #[error("bearer token has been revoked")]
    TokenRevoked,

    /// The operation needs an authenticated session and none is held.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl ClientError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }

    pub fn api_or(message: Option<&str>, fallback: &str) -> Self {
        Self::Api(message.unwrap_or(fallback).to_string())
    }

    /// User-facing text for the notification surface.
    pub fn notification(&self) -> String {
        match self {
            Self::Validation(message) | Self::Api(message) => message.clone(),
            Self::Transport(_) => "Network error, please try again.".to_string(),
            Self::TokenRevoked => "Session expired. Please log in again.".to_string(),
            Self::NotAuthenticated => "You must be logged in first.".to_string(),
        }
    }
}
