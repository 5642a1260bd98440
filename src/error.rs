//! Error types for the router watchdog.

use reqwest::Url;

/// Everything that can go wrong talking to the router or publishing its state.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Router unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: Url },

    #[error("Malformed status document: {0}")]
    MalformedResponse(String),

    #[error("Security token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("Login rejected, landed on {landed}")]
    AuthRejected { landed: Url },

    #[error("Failed to disconnect, landed on {landed}")]
    DisconnectFailed { landed: Url },

    #[error("Failed to reconnect, landed on {landed}")]
    ReconnectFailed { landed: Url },

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

impl RouterError {
    /// A rejected credential will not fix itself; everything else might.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RouterError::AuthRejected { .. })
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(e: reqwest::Error) -> Self {
        match (e.status(), e.url()) {
            (Some(status), Some(url)) => RouterError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.clone(),
            },
            _ => RouterError::Unreachable(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
