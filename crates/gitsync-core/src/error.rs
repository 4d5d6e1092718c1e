//! Error types for gitsync-core

use uuid::Uuid;

use crate::jobs::JobState;

/// Result type for gitsync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure is reported to a caller.
///
/// Every [`Error`] maps onto exactly one class; request surfaces translate
/// the class into a status and never inspect the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad path, malformed manifest, missing name, invalid options.
    Input,
    Forbidden,
    NotFound,
    Conflict,
    /// Dry-run admission rejected a resource.
    Validation,
    /// Transient backend failure; retrying may succeed.
    Unavailable,
    Internal,
}

/// Errors that can occur in gitsync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller input rejected before any work started.
    #[error("{field}: {message}")]
    Input { field: String, message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    /// Dry run rejected the resource; one message per invalid object.
    #[error("dry run failed: {}", .messages.join("; "))]
    Validation { messages: Vec<String> },

    /// Terminal jobs never change again.
    #[error("job {id} is {state} and can no longer change")]
    JobImmutable { id: Uuid, state: JobState },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("job {id} did not finish before the polling deadline")]
    PollTimeout { id: Uuid },

    #[error("background task failed: {message}")]
    Task { message: String },

    // Transparent wrappers for underlying crate errors
    /// Filesystem or path error from gitsync-fs
    #[error(transparent)]
    Fs(#[from] gitsync_fs::Error),

    /// Path rejected by the resolver
    #[error(transparent)]
    Path(#[from] gitsync_fs::PathError),

    /// Adapter error from gitsync-repository
    #[error(transparent)]
    Repository(#[from] gitsync_repository::Error),

    /// Conversion or store error from gitsync-resources
    #[error(transparent)]
    Resources(#[from] gitsync_resources::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Map this error onto the caller-facing taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Input { .. } | Self::Path(_) => ErrorClass::Input,
            Self::Forbidden { .. } => ErrorClass::Forbidden,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::AlreadyExists { .. } | Self::JobImmutable { .. } | Self::InvalidTransition { .. } => {
                ErrorClass::Conflict
            }
            Self::Validation { .. } => ErrorClass::Validation,
            Self::PollTimeout { .. } => ErrorClass::Unavailable,
            Self::Task { .. } | Self::Json(_) => ErrorClass::Internal,
            Self::Fs(err) => fs_class(err),
            Self::Repository(err) => repository_class(err),
            Self::Resources(err) => resources_class(err),
        }
    }

    /// Field path an input error is about.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Input { field, .. } => Some(field),
            Self::Path(_) | Self::Fs(gitsync_fs::Error::Path(_)) => Some("path"),
            Self::Repository(gitsync_repository::Error::Config { field, .. }) => Some(field),
            Self::Repository(gitsync_repository::Error::Fs(gitsync_fs::Error::Path(_))) => {
                Some("path")
            }
            Self::Resources(err) => err.field_path(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

fn fs_class(err: &gitsync_fs::Error) -> ErrorClass {
    use gitsync_fs::Error as E;
    match err {
        E::Path(_) | E::ConfigParse { .. } | E::UnsupportedFormat { .. } => ErrorClass::Input,
        E::LockFailed { .. } => ErrorClass::Unavailable,
        E::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            ErrorClass::NotFound
        }
        _ => ErrorClass::Internal,
    }
}

fn repository_class(err: &gitsync_repository::Error) -> ErrorClass {
    use gitsync_repository::Error as E;
    match err {
        E::NotFound { .. } | E::RefNotFound { .. } => ErrorClass::NotFound,
        E::AlreadyExists { .. } | E::Conflict { .. } => ErrorClass::Conflict,
        E::VersionedUnsupported { .. } | E::Config { .. } => ErrorClass::Input,
        E::ReadOnly { .. } => ErrorClass::Forbidden,
        E::Unavailable { .. } => ErrorClass::Unavailable,
        E::Fs(inner) => fs_class(inner),
        _ => ErrorClass::Internal,
    }
}

fn resources_class(err: &gitsync_resources::Error) -> ErrorClass {
    use gitsync_resources::Error as E;
    match err {
        E::Decode { .. } | E::Field { .. } | E::UnknownKind { .. } => ErrorClass::Input,
        E::NotFound { .. } => ErrorClass::NotFound,
        E::AlreadyExists { .. } | E::Conflict { .. } => ErrorClass::Conflict,
        E::Forbidden { .. } => ErrorClass::Forbidden,
        E::Invalid { .. } => ErrorClass::Validation,
        E::Encode { .. } => ErrorClass::Internal,
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsync_fs::PathError;
    use rstest::rstest;

    #[rstest]
    #[case(Error::from(PathError::DotSegment { segment: "..".into() }), ErrorClass::Input)]
    #[case(Error::from(gitsync_repository::Error::ReadOnly { name: "r".into() }), ErrorClass::Forbidden)]
    #[case(Error::from(gitsync_repository::Error::not_found("a.json")), ErrorClass::NotFound)]
    #[case(Error::from(gitsync_repository::Error::Unavailable { message: "503".into() }), ErrorClass::Unavailable)]
    #[case(Error::from(gitsync_resources::Error::field("metadata.name", "required")), ErrorClass::Input)]
    #[case(Error::Validation { messages: vec!["bad".into()] }, ErrorClass::Validation)]
    #[case(Error::JobImmutable { id: Uuid::nil(), state: JobState::Success }, ErrorClass::Conflict)]
    fn errors_map_onto_taxonomy(#[case] err: Error, #[case] class: ErrorClass) {
        assert_eq!(err.class(), class);
    }

    #[test]
    fn input_errors_carry_field_paths() {
        let err = Error::from(gitsync_resources::Error::field("metadata.name", "required"));
        assert_eq!(err.field(), Some("metadata.name"));

        let err = Error::from(PathError::Empty);
        assert_eq!(err.field(), Some("path"));

        let err = Error::from(gitsync_repository::Error::config("spec.github.url", "bad"));
        assert_eq!(err.field(), Some("spec.github.url"));
    }
}
