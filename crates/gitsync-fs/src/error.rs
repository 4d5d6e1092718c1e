//! Error types for gitsync-fs

use std::path::PathBuf;

/// Result type for gitsync-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gitsync-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    #[error(transparent)]
    Path(#[from] PathError),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A requested path was rejected by the resolver.
///
/// Always a client input error, whatever the repository type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,

    #[error("path contains an empty segment: {path}")]
    EmptySegment { path: String },

    #[error("path contains a relative segment '{segment}'")]
    DotSegment { segment: String },

    #[error("path segment contains a backslash: {segment}")]
    Backslash { segment: String },

    #[error("path must be relative to the repository root: {path}")]
    Absolute { path: String },

    #[error("path escapes the repository root: {path}")]
    Escapes { path: String },

    #[error("the repository root cannot be addressed by this operation")]
    RootNotAllowed,

    #[error("expected a file path, got a directory: {path}")]
    NotAFile { path: String },
}
