//! Provenance annotations
//!
//! A resource written by the sync pipeline carries the identity of the
//! repository that owns it, the file it came from, and a checksum of that
//! file's content. These are server-managed and never exported to files.

use crate::ObjectMeta;

pub const MANAGED_BY: &str = "grafana.app/managedBy";
pub const MANAGER_ID: &str = "grafana.app/managerId";
pub const SOURCE_PATH: &str = "grafana.app/sourcePath";
pub const SOURCE_CHECKSUM: &str = "grafana.app/sourceChecksum";
pub const UPDATED_BY: &str = "grafana.app/updatedBy";
/// Name of the folder an object is placed in.
pub const FOLDER: &str = "grafana.app/folder";

/// Annotations the store owns; stripped from exported files.
pub const SERVER_MANAGED: [&str; 6] = [
    MANAGED_BY,
    MANAGER_ID,
    SOURCE_PATH,
    SOURCE_CHECKSUM,
    UPDATED_BY,
    FOLDER,
];

/// What kind of actor manages a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerKind {
    Repo,
    Other(String),
}

impl ManagerKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Repo => "repo",
            Self::Other(other) => other,
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "repo" => Self::Repo,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Ownership record read from or written to an object's annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub manager_kind: ManagerKind,
    pub manager_id: String,
    pub source_path: Option<String>,
    pub source_checksum: Option<String>,
}

impl Provenance {
    /// Owned by the named repository.
    pub fn repo(name: impl Into<String>) -> Self {
        Self {
            manager_kind: ManagerKind::Repo,
            manager_id: name.into(),
            source_path: None,
            source_checksum: None,
        }
    }

    pub fn with_source(mut self, path: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self.source_checksum = Some(checksum.into());
        self
    }

    /// Write these annotations onto `meta`, replacing any previous owner.
    pub fn stamp(&self, meta: &mut ObjectMeta) {
        meta.set_annotation(MANAGED_BY, self.manager_kind.as_str());
        meta.set_annotation(MANAGER_ID, self.manager_id.clone());
        match &self.source_path {
            Some(path) => meta.set_annotation(SOURCE_PATH, path.clone()),
            None => {
                meta.annotations.remove(SOURCE_PATH);
            }
        }
        match &self.source_checksum {
            Some(checksum) => meta.set_annotation(SOURCE_CHECKSUM, checksum.clone()),
            None => {
                meta.annotations.remove(SOURCE_CHECKSUM);
            }
        }
    }

    /// Read the manager annotations, `None` when the object is unmanaged.
    pub fn of(meta: &ObjectMeta) -> Option<Self> {
        let kind = meta.annotation(MANAGED_BY)?;
        let id = meta.annotation(MANAGER_ID)?;
        Some(Self {
            manager_kind: ManagerKind::parse(kind),
            manager_id: id.to_string(),
            source_path: meta.annotation(SOURCE_PATH).map(str::to_string),
            source_checksum: meta.annotation(SOURCE_CHECKSUM).map(str::to_string),
        })
    }

    /// Whether `meta` is managed by the repository called `repository`.
    pub fn is_owned_by(meta: &ObjectMeta, repository: &str) -> bool {
        Self::of(meta)
            .is_some_and(|p| p.manager_kind == ManagerKind::Repo && p.manager_id == repository)
    }

    /// Whether `meta` is managed by any repository.
    pub fn is_repo_managed(meta: &ObjectMeta) -> bool {
        Self::of(meta).is_some_and(|p| p.manager_kind == ManagerKind::Repo)
    }
}

/// Folder an object is placed in, if any.
pub fn folder(meta: &ObjectMeta) -> Option<&str> {
    meta.annotation(FOLDER)
}

pub fn set_folder(meta: &mut ObjectMeta, folder: Option<&str>) {
    match folder {
        Some(name) => meta.set_annotation(FOLDER, name),
        None => {
            meta.annotations.remove(FOLDER);
        }
    }
}

/// Remove every server-managed annotation.
pub fn strip(meta: &mut ObjectMeta) {
    for key in SERVER_MANAGED {
        meta.annotations.remove(key);
    }
}
