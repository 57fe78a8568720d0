//! Custom error types for fsperf.
//!
//! This module defines explicit enum error types.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the fsperf harness.
#[derive(Debug, Error)]
pub enum FsPerfError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Remote Protocol Errors
    // =========================================================================
    #[error("Comms error: {0}")]
    Comms(#[from] CommsError),

    #[error("Slave error: {0}")]
    Slave(#[from] SlaveError),

    // =========================================================================
    // Measurement Errors
    // =========================================================================
    #[error("Profiling '{name}' failed at iteration {iteration}: {source}")]
    Profile {
        name: String,
        iteration: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Test directory already exists: {path}")]
    TestDirExists { path: PathBuf },

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("System call failed: {syscall} - {message}")]
    Syscall {
        syscall: &'static str,
        message: String,
    },
}

/// Hard validation errors for configuration and command-line values.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} is out of range: {value}, valid range {min}..{max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Too many block sizes: {count} (max: {max})")]
    TooManyBlockSizes { count: usize, max: usize },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// State transition errors for the comms state machines.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition {machine} from {from} to {to}")]
    InvalidTransition {
        machine: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

/// Errors raised by the shared-directory transport and the master side of
/// the protocol.
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("Script does not end with the EOF marker")]
    MissingTerminator,

    #[error("Slave is not connected: {marker} does not exist")]
    NotConnected { marker: PathBuf },

    #[error("Timed out waiting for order #{seq}; request cancelled")]
    Timeout { seq: u32 },

    #[error("Timed out waiting for order #{seq}; slave claimed it and is still busy")]
    Busy { seq: u32 },

    #[error("Message file too big: {path} ({size} bytes, max {max})")]
    FileTooBig { path: PathBuf, size: u64, max: u64 },

    #[error("Malformed done reply: {reply:?}")]
    MalformedReply { reply: String },

    #[error("Slave has already been shut down")]
    AlreadyShutDown,

    #[error("Comms IO error: {context} {path} - {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while executing a script on the slave side.
///
/// Every variant maps to the numeric status published in the done-file.
#[derive(Debug, Error)]
pub enum SlaveError {
    #[error("line {line}: {command}: syntax error: {message}")]
    Syntax {
        line: usize,
        command: String,
        message: String,
    },

    #[error("line {line}: {command}: error: {message}")]
    Execution {
        line: usize,
        command: String,
        message: String,
        status: i32,
    },

    #[error("Failed to parse line {line}: {message}")]
    ParseLine { line: usize, message: String },

    #[error("No command found on line {line}")]
    NoCommand { line: usize },

    #[error("Command on line {line} not found: {text}")]
    UnknownCommand { line: usize, text: String },

    #[error("Script is not valid UTF-8: {message}")]
    InvalidEncoding { message: String },
}

/// Done-file status for a general failure.
pub const STATUS_GENERAL_FAILURE: i32 = -1;
/// Done-file status for a syntax error.
pub const STATUS_SYNTAX_ERROR: i32 = -2;
/// Done-file status for an unknown command.
pub const STATUS_NOT_FOUND: i32 = -3;
/// Done-file status for a handle slot in the wrong state.
pub const STATUS_HANDLE_STATE: i32 = -4;
/// Done-file status for undecodable script content.
pub const STATUS_INVALID_ENCODING: i32 = -5;

impl SlaveError {
    /// Numeric status reported to the master.
    pub fn status(&self) -> i32 {
        match self {
            Self::Syntax { .. } | Self::ParseLine { .. } => STATUS_SYNTAX_ERROR,
            Self::Execution { status, .. } => *status,
            Self::NoCommand { .. } | Self::InvalidEncoding { .. } => STATUS_INVALID_ENCODING,
            Self::UnknownCommand { .. } => STATUS_NOT_FOUND,
        }
    }
}

/// Status for a failed OS call: the positive errno, or a general failure
/// when the error carries none.
pub fn io_status(err: &std::io::Error) -> i32 {
    err.raw_os_error()
        .filter(|errno| *errno > 0)
        .unwrap_or(STATUS_GENERAL_FAILURE)
}

/// Result type alias using FsPerfError.
pub type FsPerfResult<T> = Result<T, FsPerfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::OutOfRange {
            field: "file index",
            value: 9,
            min: 0,
            max: 7,
        };
        assert_eq!(
            err.to_string(),
            "file index is out of range: 9, valid range 0..7"
        );
    }

    #[test]
    fn test_error_chain() {
        let comms_err = CommsError::Timeout { seq: 3 };
        let err: FsPerfError = comms_err.into();
        assert!(matches!(err, FsPerfError::Comms(CommsError::Timeout { seq: 3 })));
    }

    #[test]
    fn test_slave_error_messages() {
        let err = SlaveError::Syntax {
            line: 2,
            command: "close".to_string(),
            message: "takes exactly one argument, not 2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "line 2: close: syntax error: takes exactly one argument, not 2"
        );
        assert_eq!(err.status(), STATUS_SYNTAX_ERROR);

        let err = SlaveError::UnknownCommand {
            line: 4,
            text: "frobnicate 1".to_string(),
        };
        assert!(err.to_string().contains("line 4 not found"));
        assert_eq!(err.status(), STATUS_NOT_FOUND);
    }

    #[test]
    fn test_io_status_uses_errno() {
        let err = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(io_status(&err), libc::ENOENT);

        let err = std::io::Error::new(std::io::ErrorKind::Other, "synthetic");
        assert_eq!(io_status(&err), STATUS_GENERAL_FAILURE);
    }
}
