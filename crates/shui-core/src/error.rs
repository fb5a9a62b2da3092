//! Error handling for the SHUI printer client
//!
//! Provides error types for every layer of the communication core:
//! - Command errors (TCP session and command queue)
//! - Job errors (print job state machine)
//! - Upload errors (HTTP file transfer)
//! - Parse errors (malformed firmware fields, never fatal)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Command error type
///
/// Represents failures of a single command submitted to the command channel.
/// These are transient: the poller recovers from them on its next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The TCP session is not available
    #[error("Printer not connected")]
    NotConnected,

    /// No terminating response arrived before the deadline
    #[error("Command timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The socket failed mid-command
    #[error("Connection I/O error: {reason}")]
    Io {
        /// The underlying I/O failure.
        reason: String,
    },

    /// The core is shutting down
    #[error("Printer core is shutting down")]
    ShuttingDown,
}

/// Print job error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The requested action is not allowed from the current job state
    #[error("Invalid job transition from {current} to {requested}")]
    InvalidTransition {
        /// The current job state.
        current: String,
        /// The requested job state.
        requested: String,
    },

    /// A sustained disconnect forced the job back to idle
    #[error("Connection to printer lost")]
    ConnectionLost,
}

/// Upload error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// HTTP-level failure (refused, non-2xx status, timeout, firmware error)
    #[error("Upload failed: {reason}")]
    Failed {
        /// The reason the upload failed.
        reason: String,
    },

    /// The upload was cancelled by the user
    #[error("Upload cancelled")]
    Cancelled,

    /// The local file could not be read
    #[error("Cannot read {path}: {reason}")]
    FileUnreadable {
        /// The file path.
        path: String,
        /// The reason the file could not be read.
        reason: String,
    },
}

/// Firmware response parse error
///
/// Recorded for diagnostics when a numeric field fails to parse. The field is
/// treated as unchanged and processing continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A numeric field could not be parsed
    #[error("Malformed {field} value '{raw}'")]
    MalformedNumber {
        /// The field name.
        field: &'static str,
        /// The raw text that failed to parse.
        raw: String,
    },
}

/// Main error type for the SHUI printer client
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Command channel error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Job state machine error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Upload error
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Response parse anomaly
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Command(CommandError::Timeout { .. }))
    }

    /// Check if this error is recovered locally by the reconnect policy
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Command(
                CommandError::NotConnected | CommandError::Timeout { .. } | CommandError::Io { .. }
            )
        )
    }

    /// Check if this is a rejected job transition
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Error::Job(JobError::InvalidTransition { .. }))
    }

    /// Check if this is a cancelled upload
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Upload(UploadError::Cancelled))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
