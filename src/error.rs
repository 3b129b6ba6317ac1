use thiserror::Error;

use crate::config::ConfigError;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to set up HTTP client: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to one of the remote services (OCR, caption, chat)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No credential configured for the service; detected before any request
    #[error("No credential configured for the {0} service")]
    CredentialMissing(&'static str),

    /// The service answered with a retryable status (model warming up)
    #[error("Service unavailable ({status}), model is warming up")]
    ServiceUnavailable { status: u16 },

    /// Timeout or connection failure
    #[error("{}", transport_message(.timed_out, .message))]
    Transport { timed_out: bool, message: String },

    /// Any other non-success status
    #[error("Server error ({status}): {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Failed to prepare request: {0}")]
    Encoding(String),

    /// The background task running the request panicked or was cancelled
    #[error("Request aborted: {0}")]
    Aborted(String),
}

fn transport_message(timed_out: &bool, message: &str) -> String {
    if *timed_out {
        format!("Request timed out: {}", message)
    } else {
        format!("Connection error: {}", message)
    }
}

impl ServiceError {
    /// Build a transport error from a reqwest failure
    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        ServiceError::Transport {
            timed_out: error.is_timeout(),
            message: error.to_string(),
        }
    }
}
