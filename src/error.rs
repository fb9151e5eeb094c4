//! Custom error types for the console.
//!
//! This module defines the primary error type, `ConsoleError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures an operator can run into, from a dropped link to
//! the sensing service to a malformed calibration edit.
//!
//! ## Error Hierarchy
//!
//! The first five variants form the operator-facing taxonomy:
//!
//! - **`TransportDisconnected`**: The detection stream is unavailable. This is the only
//!   blocking error; mode changes, arming and solves are frozen until reconnect.
//! - **`ModeRejected`**: The sensing service refused a mode transition. The local mode
//!   stays unchanged.
//! - **`SolveFailed`**: A calibration solve failed on the service side. Scoped to the
//!   procedure that issued it.
//! - **`MalformedConfigEdit`**: Operator-supplied structured text could not be parsed.
//!   The previous value is retained.
//! - **`ExportFailure`**: Archive construction failed. No partial archive is offered.
//!
//! The remaining variants are local precondition failures (feature gated by mode,
//! recorder in the wrong state, nothing captured) and wrapped I/O, serialization and
//! configuration errors. By using `#[from]`, `ConsoleError` can be created from the
//! underlying error types with the `?` operator.

use thiserror::Error;

use crate::calibration::ConfigField;
use crate::capture::ProcedureKind;
use crate::mode::OperatingMode;

/// Convenience alias for results using the console error type.
pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConsoleError {
    #[error("Not connected to the sensing service")]
    TransportDisconnected,

    #[error("Mode change rejected: {0}")]
    ModeRejected(String),

    #[error("{procedure} calibration failed: {reason}")]
    SolveFailed {
        procedure: ProcedureKind,
        reason: String,
    },

    #[error("Could not parse {field}: {source}")]
    MalformedConfigEdit {
        field: ConfigField,
        #[source]
        source: serde_json::Error,
    },

    #[error("Export failed: {0}")]
    ExportFailure(String),

    #[error("'{feature}' requires mode {required} (current: {current})")]
    ModeUnavailable {
        feature: &'static str,
        required: OperatingMode,
        current: OperatingMode,
    },

    #[error("Cannot go from \"{from}\" to \"{to}\"")]
    TransitionNotAllowed {
        from: OperatingMode,
        to: OperatingMode,
    },

    #[error("No recording session is active")]
    NotRecording,

    #[error("Recording session '{0}' is already active")]
    AlreadyRecording(String),

    #[error("Invalid session name '{0}'")]
    InvalidSessionName(String),

    #[error("No samples captured for {0}")]
    NothingCaptured(ProcedureKind),

    #[error("{procedure} needs {field}, which has not been loaded or solved")]
    MissingCalibration {
        procedure: ProcedureKind,
        field: ConfigField,
    },

    #[error("{field} has unexpected shape: {detail}")]
    ShapeMismatch { field: ConfigField, detail: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Console coordinator has stopped")]
    ActorStopped,
}

impl ConsoleError {
    /// Whether this error blocks further operation until the link comes back.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ConsoleError::TransportDisconnected)
    }

    /// Whether the operator can dismiss the error and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ConsoleError::TransportDisconnected
                | ConsoleError::Io(_)
                | ConsoleError::Config(_)
                | ConsoleError::ActorStopped
        )
    }
}
