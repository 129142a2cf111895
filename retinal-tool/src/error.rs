use retinal_openai::{ErrorKind, VisionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid setting {key}: {message}")]
    InvalidSetting { key: &'static str, message: String },
}

/// Process exit code for a vision error kind.
pub fn kind_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::AuthError => 3,
        ErrorKind::RateLimited => 4,
        ErrorKind::NetworkError => 5,
        ErrorKind::UpstreamError => 6,
        ErrorKind::Cancelled => 130,
    }
}

/// Finds the vision error behind an `anyhow` chain, if there is one.
pub fn vision_error(err: &anyhow::Error) -> Option<&VisionError> {
    err.downcast_ref::<VisionError>()
}

/// Label and exit code used when reporting `err`.
pub fn classify(err: &anyhow::Error) -> (&'static str, u8) {
    match vision_error(err) {
        Some(e) => (e.kind().as_str(), kind_exit_code(e.kind())),
        None => ("config", 1),
    }
}
