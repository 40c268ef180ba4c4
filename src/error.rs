//! Error taxonomy for the synchronization engine.
//!
//! Transport failures are recoverable (retry via `SyncSession::refresh`);
//! validation failures are caller mistakes and never reach the network.
//! Superseded fetch results are not errors at all: they are discarded
//! internally and only traced.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network or server failure while fetching a page.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// Malformed filter input. Reported to the caller before any fetch.
    #[error("invalid filter input: {0}")]
    Validation(String),

    /// Settings could not be loaded or the telemetry layer failed to install.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a retry (manual refresh) can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}
