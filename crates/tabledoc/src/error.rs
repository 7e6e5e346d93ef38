//! Error types for tabledoc

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tabledoc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tabledoc errors
#[derive(Debug, Error)]
pub enum Error {
    /// Upload batch has a different number of files and titles
    #[error("Malformed batch: {files} files but {titles} titles")]
    BatchMalformed { files: usize, titles: usize },

    /// A file could not be opened or read
    #[error("Cannot read file '{filename}': {message}")]
    FileUnreadable { filename: String, message: String },

    /// CSV decoding failed
    #[error("Malformed CSV{}: {message}", .line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    MalformedInput { line: Option<u64>, message: String },

    /// Record store returned an error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document or row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The batch was cancelled before this work finished
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable error classification reported per file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BatchMalformed,
    FileUnreadable,
    MalformedInput,
    StorageFailure,
    NotFound,
    Config,
    Cancelled,
    Internal,
}

impl Error {
    /// Create a file unreadable error
    pub fn file_unreadable(filename: impl Into<String>, message: impl ToString) -> Self {
        Self::FileUnreadable {
            filename: filename.into(),
            message: message.to_string(),
        }
    }

    /// Create a malformed input error
    pub fn malformed(line: Option<u64>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BatchMalformed { .. } => ErrorKind::BatchMalformed,
            Error::FileUnreadable { .. } => ErrorKind::FileUnreadable,
            Error::MalformedInput { .. } => ErrorKind::MalformedInput,
            Error::Storage(_) => ErrorKind::StorageFailure,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Config(_) => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line());
        let message = match err.kind() {
            csv::ErrorKind::UnequalLengths { expected_len, len, .. } => {
                format!("expected {} fields, found {}", expected_len, len)
            }
            csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {}", err),
            _ => err.to_string(),
        };
        match err.into_kind() {
            // Reading the source failed, not decoding it
            csv::ErrorKind::Io(e) => Error::Io(e),
            _ => Error::malformed(line, message),
        }
    }
}
