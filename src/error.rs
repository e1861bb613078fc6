//! Error types for media_guard.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media_guard.
#[derive(Error, Debug)]
pub enum Error {
    // File system errors
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    // Pipeline errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Undo failed: {0}")]
    Undo(String),

    #[error("Rollback failed: {0}")]
    Rollback(String),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Journal write failed: {0}")]
    JournalIo(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Lookup errors
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(Uuid),

    #[error("Journal entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Staged file not found: {0}")]
    StagedFileNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),

    // Archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Pipeline-stage classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Preflight blocking issue or `validate()` returned false. Nothing was touched.
    Validation,
    /// Failure inside the operation body. Partial state is possible.
    Execution,
    /// Inversion of a command failed. State is left as-is.
    Undo,
    /// Engine-level inversion failure, or an operation that cannot be inverted.
    Rollback,
    /// Staging a path failed. Non-fatal per file.
    Staging,
    /// Durable journal write failed.
    JournalIo,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::Undo => "UndoError",
            ErrorKind::Rollback => "RollbackError",
            ErrorKind::Staging => "StagingError",
            ErrorKind::JournalIo => "JournalIOError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Classify this error into the pipeline taxonomy.
    ///
    /// Plain I/O and lookup errors surfacing from an operation body count as
    /// execution failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::FileAlreadyExists(_) => ErrorKind::Validation,
            Error::Undo(_) | Error::NothingToUndo | Error::NothingToRedo => ErrorKind::Undo,
            Error::Rollback(_) => ErrorKind::Rollback,
            Error::Staging(_) => ErrorKind::Staging,
            Error::JournalIo(_) => ErrorKind::JournalIo,
            _ => ErrorKind::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Rollback("x".into()).kind(), ErrorKind::Rollback);
        assert_eq!(Error::JournalIo("x".into()).kind(), ErrorKind::JournalIo);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(Error::from(io).kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::JournalIo.to_string(), "JournalIOError");
        assert_eq!(ErrorKind::Validation.to_string(), "ValidationError");
    }
}
