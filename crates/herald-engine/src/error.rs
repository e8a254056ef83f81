//! Error types for the alert engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the alert engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed alert, rejected before any state is touched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rule, channel or alert not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Channel is disabled.
    #[error("Channel disabled: {0}")]
    ChannelDisabled(String),

    /// Send operation failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid rule or channel configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Other error.
    #[error("Other: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ChannelDisabled(_) => "CHANNEL_DISABLED",
            Self::SendFailed(_) => "SEND_FAILED",
            Self::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            Self::Config(_) => "CONFIG",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("alert id is empty".to_string());
        assert_eq!(err.to_string(), "Validation error: alert id is empty");
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_from_anyhow() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
