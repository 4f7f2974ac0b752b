// Error taxonomy for the chat client library

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad credentials on login or register; the detail is shown to the user
    #[error("{0}")]
    Auth(String),

    /// The backend rejected the bearer token
    #[error("session rejected by the server")]
    Unauthorized,

    #[error("server returned {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("network failure: {0}")]
    Network(String),

    #[error("live channel failure: {0}")]
    Channel(String),

    #[error("no active session")]
    NotAuthenticated,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether this failure should be surfaced inline in the auth form
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ChatError::Auth(_) | ChatError::Unauthorized)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Network(format!("request timed out: {}", err))
        } else {
            ChatError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Channel(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
