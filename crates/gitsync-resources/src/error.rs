//! Error types for gitsync-resources

/// Result type for gitsync-resources operations
pub type Result<T> = std::result::Result<T, Error>;

/// One violated constraint, addressed by field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCause {
    pub field: String,
    pub message: String,
}

impl FieldCause {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_causes(causes: &[FieldCause]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur converting or storing resources
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to decode file: {message}")]
    Decode { message: String },

    /// Input is structurally fine but a required field is missing or wrong.
    #[error("{field}: {message}")]
    Field { field: String, message: String },

    #[error("unsupported resource {api_version}, Kind={kind}")]
    UnknownKind { api_version: String, kind: String },

    #[error("{kind}.{group} \"{name}\" not found")]
    NotFound {
        group: String,
        kind: String,
        name: String,
    },

    #[error("{kind}.{group} \"{name}\" already exists")]
    AlreadyExists {
        group: String,
        kind: String,
        name: String,
    },

    #[error("conflict on {kind} \"{name}\": {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Admission rejected the object; one cause per violated constraint.
    #[error("{kind}.{group} \"{name}\" is invalid: [{}]", join_causes(.causes))]
    Invalid {
        group: String,
        kind: String,
        name: String,
        causes: Vec<FieldCause>,
    },

    #[error("failed to encode {format}: {message}")]
    Encode { format: String, message: String },
}

impl Error {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this is a caller input problem rather than a store failure.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::Field { .. } | Self::UnknownKind { .. }
        )
    }

    /// Field path the error is about, when it has one.
    pub fn field_path(&self) -> Option<&str> {
        match self {
            Self::Field { field, .. } => Some(field),
            Self::UnknownKind { .. } => Some("apiVersion"),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
