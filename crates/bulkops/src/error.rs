//! Error types for bulk operations.
//!
//! Only validation and persistence problems are errors. A unit of work that
//! fails is an outcome, recorded in the run result, never an `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by callers to pick wording and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request was rejected before any work started
    Validation,
    /// The engine itself could not be set up (thread pool, etc.)
    Engine,
    /// Reading or writing a saved state or report failed
    Persistence,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid request",
            Self::Engine => "Engine failure",
            Self::Persistence => "Could not read or write file",
        }
    }
}

/// Errors returned by the bulk engine and its helpers.
#[derive(Debug, Error)]
pub enum Error {
    /// The range end is below its start
    #[error("invalid range {start}-{end}: end is before start")]
    InvertedRange {
        /// First ID of the rejected range
        start: u32,
        /// Last ID of the rejected range
        end: u32,
    },

    /// The range covers more IDs than allowed
    #[error("range {start}-{end} spans {span} IDs, maximum is {max_span}")]
    SpanTooLarge {
        /// First ID of the rejected range
        start: u32,
        /// Last ID of the rejected range
        end: u32,
        /// Number of IDs in the range
        span: u64,
        /// Configured maximum
        max_span: u64,
    },

    /// A range string could not be parsed
    #[error("cannot parse range '{input}': {reason}")]
    RangeSyntax {
        /// The text that was given
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// A report format name was not recognised
    #[error("unknown report format '{0}' (expected text, json or csv)")]
    UnknownFormat(String),

    /// The worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),

    /// Filesystem error while handling a state or report file
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being attempted
        action: &'static str,
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A saved state file is malformed
    #[error("invalid state file {path}: {message}")]
    StateFormat {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Serialising a report or state failed
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl Error {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvertedRange { .. }
            | Self::SpanTooLarge { .. }
            | Self::RangeSyntax { .. }
            | Self::UnknownFormat(_) => ErrorCategory::Validation,
            Self::ThreadPool(_) => ErrorCategory::Engine,
            Self::Io { .. } | Self::StateFormat { .. } | Self::Serialize(_) => {
                ErrorCategory::Persistence
            }
        }
    }

    /// Whether the error was raised before any unit of work ran.
    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }
}

/// Result type alias for bulk operations.
pub type Result<T> = std::result::Result<T, Error>;
