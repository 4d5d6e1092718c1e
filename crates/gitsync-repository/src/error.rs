//! Error types for gitsync-repository

use crate::types::RepositoryType;

/// Result type for gitsync-repository operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in repository operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Fs(#[from] gitsync_fs::Error),

    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("file already exists: {path}")]
    AlreadyExists { path: String },

    #[error("conflict writing {path}: {message}")]
    Conflict { path: String, message: String },

    #[error("{kind} repositories do not support versioned operations")]
    VersionedUnsupported { kind: RepositoryType },

    #[error("ref '{name}' not found")]
    RefNotFound { name: String },

    #[error("invalid repository config at {field}: {message}")]
    Config { field: String, message: String },

    #[error("repository '{name}' is read only")]
    ReadOnly { name: String },

    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("background task failed: {message}")]
    Task { message: String },
}

impl Error {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl std::fmt::Display) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    /// Whether a retry could succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task {
            message: err.to_string(),
        }
    }
}
