//! Error types for the FirecREST client.

use firecrest_sched::SchedError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur when using the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Scheduling, transport or classification failure.
    #[error(transparent)]
    Sched(#[from] SchedError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Arguments that do not describe a valid call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Local file access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or a staging-area request failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// An external transfer could not be completed locally.
    #[error("External transfer error: {0}")]
    Transfer(String),
}

impl ClientError {
    /// The scheduler error behind this failure, if any.
    pub fn as_sched(&self) -> Option<&SchedError> {
        match self {
            Self::Sched(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::InvalidArgument("exactly one script source".into());
        assert_eq!(err.to_string(), "Invalid argument: exactly one script source");

        let err: ClientError = SchedError::Transport("refused".into()).into();
        assert_eq!(err.to_string(), "Transport error: refused");
        assert!(err.as_sched().is_some());
    }
}
