//! Error types for remote execution.
//!
//! Transport errors are kept separate from dispatcher errors: a transport
//! error ends one target, a dispatcher error stops the run before any
//! target is contacted.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of failure, used to word log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Could not connect or authenticate
    Connection,
    /// Connected, but a command or copy failed
    Remote,
    /// The run was interrupted
    Interrupted,
    /// Local problem (missing files, I/O)
    Local,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Could not reach target",
            Self::Remote => "Remote operation failed",
            Self::Interrupted => "Interrupted",
            Self::Local => "Local error",
        }
    }
}

/// Failure of a single remote-shell or file-transfer call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection or authentication failure
    #[error("cannot reach {target}: {message}")]
    Connection {
        /// Target name
        target: String,
        /// What the connection layer reported
        message: String,
    },

    /// A file copy failed after connecting
    #[error("transfer with {target} failed: {message}")]
    Transfer {
        /// Target name
        target: String,
        /// What the copy tool reported
        message: String,
    },

    /// The call was cancelled and its child process killed
    #[error("interrupted")]
    Interrupted,

    /// The local client program could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the local client program failed
    #[error("failed waiting for {program}: {source}")]
    Wait {
        /// Program being waited on
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Transfer { .. } => ErrorCategory::Remote,
            Self::Interrupted => ErrorCategory::Interrupted,
            Self::Spawn { .. } | Self::Wait { .. } => ErrorCategory::Local,
        }
    }

    /// Whether the target could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Errors that stop a dispatch before any target is contacted.
#[derive(Debug, Error)]
pub enum Error {
    /// The same target name appears more than once
    #[error("duplicate target: {0}")]
    DuplicateTarget(String),

    /// The payload script does not exist or is not a file
    #[error("payload script not found: {0}")]
    ScriptNotFound(PathBuf),

    /// A support file or directory does not exist
    #[error("support file not found: {0}")]
    SupportFileNotFound(PathBuf),

    /// Building the payload archive failed
    #[error("packaging failed: {0}")]
    Packaging(String),

    /// Local filesystem error
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted
        action: &'static str,
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Local
    }
}

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_categories() {
        let err = TransportError::Connection {
            target: "pve2".to_string(),
            message: "Connection refused".to_string(),
        };
        assert!(err.is_connection());
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(err.to_string(), "cannot reach pve2: Connection refused");

        assert!(TransportError::Interrupted.is_interrupted());
        assert_eq!(
            TransportError::Interrupted.category().description(),
            "Interrupted"
        );
    }
}
