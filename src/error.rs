//! Error types for execrelay
//!
//! Preparation failures (tokenizing, executable lookup, identity, spawn) are returned
//! synchronously from the executor. Runtime failures (non-zero exit, deadline expiry,
//! pipe read errors) travel through the completion signal instead.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::executor::StreamKind;

/// Malformed command-line quoting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// A quote span was opened and never closed
    #[error("unclosed {quote} quote opened at byte {position}")]
    UnclosedQuote { quote: char, position: usize },
}

/// Failure to resolve a user name into launch credentials
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No such account (or, on Windows, no process running as that account)
    #[error("user not found: {user}")]
    UserNotFound { user: String },

    /// The account exists but its token could not be opened or duplicated
    #[error("failed to acquire launch token for {user}: {reason}")]
    TokenAcquisition { user: String, reason: String },

    /// The user database itself could not be queried
    #[error("user lookup failed for {user}: {source}")]
    Lookup {
        user: String,
        #[source]
        source: std::io::Error,
    },

    /// Identity switching is not available on this platform
    #[error("identity switching is not supported on this platform")]
    Unsupported,
}

/// A write was attempted on a relay after `close()`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("write to closed relay")]
pub struct ClosedRelayError;

/// Main error type for command execution
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command string could not be split into arguments
    #[error("Failed to tokenize command: {0}")]
    Tokenize(#[from] TokenizeError),

    /// The command string produced no arguments
    #[error("Empty command")]
    EmptyCommand,

    /// The executable could not be found on PATH
    #[error("Executable not found: {program}")]
    Lookup {
        program: String,
        #[source]
        source: which::Error,
    },

    /// Launch credentials could not be obtained for the target user
    #[error("Failed to configure identity: {0}")]
    Identity(#[from] IdentityError),

    /// The OS refused to spawn the process
    #[error("Failed to start command: {command}")]
    Start {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("Command exited with {}: {command}", describe_exit(.code))]
    NonZeroExit { command: String, code: Option<i32> },

    /// The deadline elapsed and the process was terminated
    #[error("Command exceeded its {}ms deadline: {command}", .timeout.as_millis())]
    DeadlineExceeded { command: String, timeout: Duration },

    /// Draining one of the output pipes failed
    #[error("Failed reading {stream}: {source}")]
    Stream {
        stream: StreamKind,
        #[source]
        source: std::io::Error,
    },

    /// Executor configuration could not be applied
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl ExecError {
    /// Stable snake_case tag for this error
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Tokenize(_) => "tokenize_error",
            ExecError::EmptyCommand => "empty_command",
            ExecError::Lookup { .. } => "lookup_error",
            ExecError::Identity(_) => "identity_error",
            ExecError::Start { .. } => "start_error",
            ExecError::NonZeroExit { .. } => "runtime_error",
            ExecError::DeadlineExceeded { .. } => "deadline_exceeded",
            ExecError::Stream { .. } => "stream_error",
            ExecError::Config(_) => "config_error",
            ExecError::Io(_) => "io_error",
        }
    }

    /// Whether this error is raised before any process exists
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            ExecError::Tokenize(_)
                | ExecError::EmptyCommand
                | ExecError::Lookup { .. }
                | ExecError::Identity(_)
                | ExecError::Start { .. }
                | ExecError::Config(_)
        )
    }

    /// Exit code reported by the child, if it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }
}

/// Serializable error info for JSON output
#[derive(Debug, Serialize, Clone)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<&ExecError> for ErrorInfo {
    fn from(err: &ExecError) -> Self {
        ErrorInfo {
            message: err.to_string(),
            error_type: err.kind().to_string(),
            suggestion: suggest_fix(err),
            exit_code: err.exit_code(),
        }
    }
}

/// Suggest fixes for common failures
pub fn suggest_fix(err: &ExecError) -> Option<String> {
    match err {
        ExecError::Tokenize(TokenizeError::UnclosedQuote { quote, .. }) => Some(format!(
            "Close the {} quote or escape it with a backslash",
            quote
        )),
        ExecError::EmptyCommand => Some("Provide a command to run".to_string()),
        ExecError::Lookup { program, .. } => Some(format!(
            "'{}' was not found. Check PATH or use an absolute path.",
            program
        )),
        ExecError::Identity(IdentityError::UserNotFound { user }) => Some(format!(
            "Account '{}' does not exist on this host",
            user
        )),
        ExecError::Identity(IdentityError::TokenAcquisition { .. }) => Some(
            "Switching users requires elevated privileges. Run as administrator.".to_string(),
        ),
        ExecError::Start { source, .. }
            if source.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            Some(
                "Permission denied. Check file permissions or run with appropriate access."
                    .to_string(),
            )
        }
        ExecError::DeadlineExceeded { .. } => {
            Some("Try increasing the timeout or checking if the command hangs".to_string())
        }
        ExecError::Config(_) => Some("Check your execrelay configuration file".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unclosed_quote_display() {
        let err = TokenizeError::UnclosedQuote {
            quote: '"',
            position: 5,
        };
        assert_eq!(err.to_string(), "unclosed \" quote opened at byte 5");
    }

    #[test]
    fn test_non_zero_exit_display() {
        let err = ExecError::NonZeroExit {
            command: "false".to_string(),
            code: Some(1),
        };
        assert_eq!(err.to_string(), "Command exited with status 1: false");
        assert_eq!(err.exit_code(), Some(1));

        let signalled = ExecError::NonZeroExit {
            command: "sleep 10".to_string(),
            code: None,
        };
        assert!(signalled.to_string().contains("a signal"));
    }

    #[test]
    fn test_deadline_display() {
        let err = ExecError::DeadlineExceeded {
            command: "sleep 5".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("3000ms"));
        assert!(err.to_string().contains("sleep 5"));
    }

    #[test]
    fn test_synchronous_classification() {
        assert!(ExecError::EmptyCommand.is_synchronous());
        assert!(ExecError::Identity(IdentityError::Unsupported).is_synchronous());
        assert!(!ExecError::NonZeroExit {
            command: "x".to_string(),
            code: Some(2)
        }
        .is_synchronous());
        assert!(!ExecError::Stream {
            stream: StreamKind::Stderr,
            source: std::io::Error::other("broken"),
        }
        .is_synchronous());
    }

    #[test]
    fn test_identity_error_conversion() {
        let err: ExecError = IdentityError::UserNotFound {
            user: "ghost".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "identity_error");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_error_info_from_deadline() {
        let err = ExecError::DeadlineExceeded {
            command: "make test".to_string(),
            timeout: Duration::from_secs(300),
        };
        let info = ErrorInfo::from(&err);

        assert_eq!(info.error_type, "deadline_exceeded");
        assert!(info.suggestion.unwrap().contains("timeout"));
        assert!(info.exit_code.is_none());
    }

    #[test]
    fn test_error_info_serialization() {
        let err = ExecError::NonZeroExit {
            command: "false".to_string(),
            code: Some(1),
        };
        let json = serde_json::to_string(&ErrorInfo::from(&err)).unwrap();

        assert!(json.contains("\"error_type\":\"runtime_error\""));
        assert!(json.contains("\"exit_code\":1"));
        assert!(!json.contains("suggestion"));
    }

    #[test]
    fn test_suggest_fix_unclosed_quote() {
        let err = ExecError::Tokenize(TokenizeError::UnclosedQuote {
            quote: '\'',
            position: 0,
        });
        assert!(suggest_fix(&err).unwrap().contains("'"));
    }

    #[test]
    fn test_suggest_fix_no_match() {
        let err = ExecError::Io(std::io::Error::other("boom"));
        assert!(suggest_fix(&err).is_none());
    }
}
