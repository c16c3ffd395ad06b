//! Custom error types for the crate.
//!
//! This module defines the primary error type, `ImcError`, used by every layer of the
//! driver. Using the `thiserror` crate, it provides a centralized and consistent way to
//! describe what went wrong, from configuration problems to a serial link that stopped
//! answering.
//!
//! ## Error Hierarchy
//!
//! `ImcError` groups failures the way the sampling loop recovers from them:
//!
//! - **`Config`** / **`Configuration`**: file parsing errors from `figment` and semantic
//!   validation errors. These only occur at construction time.
//! - **`Io`**, **`SerialOpen`**, **`Transport`**: transport faults. The streaming loop
//!   catches them per sample, logs them and moves on.
//! - **`InvalidChannel`**: a channel id outside 1..=4.
//! - **`LogStream`**: a log file could not be created or written.
//! - **`StreamsOutOfStep`**: a power line was written but its ambient replica was not.
//! - **`RestartLimit`**: the link kept stalling; this escapes the sampling worker and is
//!   reported by the supervisor.
//!
//! By using `#[from]`, `ImcError` can be created from the underlying error types with `?`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ImcError>;

#[derive(Error, Debug)]
pub enum ImcError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open serial port {port}: {message}")]
    SerialOpen { port: String, message: String },

    #[error("Serial support not enabled. Rebuild with --features tokio_serial")]
    SerialFeatureDisabled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel {0} is outside the valid range 1..=4")]
    InvalidChannel(u8),

    #[error("Log stream '{stream}' failed: {source}")]
    LogStream {
        stream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Ambient log is one row behind the power log: {0}")]
    StreamsOutOfStep(#[source] Box<ImcError>),

    #[error("Sampling restarted {0} times without completing, giving up")]
    RestartLimit(u32),
}

impl From<figment::Error> for ImcError {
    fn from(value: figment::Error) -> Self {
        ImcError::Config(Box::new(value))
    }
}

impl ImcError {
    /// Whether this error is a link-level fault the streaming loop may skip past.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ImcError::Io(_) | ImcError::SerialOpen { .. } | ImcError::Transport(_)
        )
    }
}
