//! Error taxonomy and JSON error reports

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Run state a service is being driven towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Up,
    Down,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Up => f.write_str("came up"),
            RunState::Down => f.write_str("went down"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration path could not be opened or read
    #[error("cannot read {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output file could not be written
    #[error("cannot write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line violates the section/body grammar
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// Polling budget was exhausted without observing the target state
    #[error("service {service} never {target} (waited {}ms)", waited.as_millis())]
    ServiceTransitionTimeout {
        service: String,
        target: RunState,
        waited: Duration,
    },

    /// Service is not present in the configured catalog
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Configuration could not be parsed or failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An external command could not be spawned or did not finish in time
    #[error("command '{command}' failed: {source}")]
    Command {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Stable error codes, used as a log field and in CLI error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FileNotFound,
    WriteFailed,
    MalformedInput,
    ServiceTransitionTimeout,
    UnknownService,
    InvalidConfig,
    CommandFailed,
    IoError,
    JsonError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::WriteFailed => "WRITE_FAILED",
            ErrorCode::MalformedInput => "MALFORMED_INPUT",
            ErrorCode::ServiceTransitionTimeout => "SERVICE_TRANSITION_TIMEOUT",
            ErrorCode::UnknownService => "UNKNOWN_SERVICE",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::JsonError => "JSON_ERROR",
        }
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::FileNotFound { .. } => ErrorCode::FileNotFound,
            Error::WriteFailed { .. } => ErrorCode::WriteFailed,
            Error::MalformedInput { .. } => ErrorCode::MalformedInput,
            Error::ServiceTransitionTimeout { .. } => ErrorCode::ServiceTransitionTimeout,
            Error::UnknownService(_) => ErrorCode::UnknownService,
            Error::Config(_) => ErrorCode::InvalidConfig,
            Error::Command { .. } => ErrorCode::CommandFailed,
            Error::Io(_) => ErrorCode::IoError,
            Error::Json(_) => ErrorCode::JsonError,
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            line,
            reason: reason.into(),
        }
    }
}

/// JSON error body printed by the CLI
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    /// The error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        ErrorReport::new(err.code(), err.to_string())
    }
}
