use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Category of a [`VisionError`], stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    RateLimited,
    AuthError,
    NetworkError,
    UpstreamError,
    Cancelled,
}

impl ErrorKind {
    /// Short snake_case label, used in log fields and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        /// Delay requested by the server via `Retry-After`, if any.
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream error{}: {message}", status_suffix(.status))]
    Upstream { status: Option<u16>, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl VisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisionError::InvalidInput(_) => ErrorKind::InvalidInput,
            VisionError::RateLimited { .. } => ErrorKind::RateLimited,
            VisionError::Auth(_) => ErrorKind::AuthError,
            VisionError::Network(_) => ErrorKind::NetworkError,
            VisionError::Upstream { .. } => ErrorKind::UpstreamError,
            VisionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        VisionError::InvalidInput(message.into())
    }

    pub(crate) fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        VisionError::Upstream {
            status,
            message: message.into(),
        }
    }
}
