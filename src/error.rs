//! Error types for connkit.
//!
//! Library operations return [`Result`]; configuration loading and the
//! binary wrap these in `anyhow` with extra context.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by sessions, scoped tasks, pipelines and transports.
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument or configuration value was not provided.
    #[error("{name} must be set")]
    MissingArgument { name: &'static str },

    /// An argument or configuration value was outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// The operation needs a Tokio runtime and was called outside of one.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The task scheduler has been shut down.
    #[error("task scheduler has stopped")]
    SchedulerStopped,

    /// Connecting did not complete within the configured timeout.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised by argument or configuration checking.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. }
        )
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_error_classification() {
        assert!(Error::MissingArgument { name: "config.codec" }.is_argument_error());
        assert!(Error::invalid("task", "blank name").is_argument_error());
        assert!(!Error::SchedulerStopped.is_argument_error());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::MissingArgument { name: "config.codec" };
        assert_eq!(err.to_string(), "config.codec must be set");

        let err = Error::invalid("decoder_max_line_length", "should be > 0: 0");
        assert_eq!(
            err.to_string(),
            "invalid argument `decoder_max_line_length`: should be > 0: 0"
        );
    }
}
