//! Registry of kinds the pipeline knows how to sync

use crate::{Error, GroupKind, Result};

pub const DASHBOARD: &str = "Dashboard";
pub const FOLDER: &str = "Folder";

/// A syncable kind and the schema versions the store serves for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindInfo {
    pub group: String,
    pub kind: String,
    /// Served versions, oldest first.
    pub versions: Vec<String>,
    /// Version used when the pipeline creates objects itself.
    pub preferred: String,
}

impl KindInfo {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(&self.group, &self.kind)
    }

    pub fn serves(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    pub fn api_version(&self, version: &str) -> String {
        format!("{}/{}", self.group, version)
    }

    pub fn preferred_api_version(&self) -> String {
        self.api_version(&self.preferred)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: Vec<KindInfo>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dashboards at four coexisting versions, and folders.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(KindInfo {
            group: "dashboard.grafana.app".into(),
            kind: DASHBOARD.into(),
            versions: ["v0alpha1", "v1beta1", "v2alpha1", "v2alpha2"]
                .map(String::from)
                .to_vec(),
            preferred: "v1beta1".into(),
        });
        registry.register(KindInfo {
            group: "folder.grafana.app".into(),
            kind: FOLDER.into(),
            versions: vec!["v1beta1".into()],
            preferred: "v1beta1".into(),
        });
        registry
    }

    pub fn register(&mut self, info: KindInfo) {
        self.kinds.retain(|k| k.group_kind() != info.group_kind());
        self.kinds.push(info);
    }

    pub fn get(&self, group_kind: &GroupKind) -> Option<&KindInfo> {
        self.kinds
            .iter()
            .find(|k| k.group == group_kind.group && k.kind == group_kind.kind)
    }

    /// Look up a kind by its bare name (`Dashboard`).
    pub fn by_kind(&self, kind: &str) -> Option<&KindInfo> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn dashboard(&self) -> Option<&KindInfo> {
        self.by_kind(DASHBOARD)
    }

    pub fn folder(&self) -> Option<&KindInfo> {
        self.by_kind(FOLDER)
    }

    /// Resolve an `apiVersion` + `kind` pair, checking the version is served.
    ///
    /// # Errors
    ///
    /// `Error::UnknownKind` when the group, kind or version is not served.
    pub fn resolve(&self, api_version: &str, kind: &str) -> Result<&KindInfo> {
        let unknown = || Error::UnknownKind {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        };
        let (group, version) = api_version.split_once('/').ok_or_else(unknown)?;
        let info = self.get(&GroupKind::new(group, kind)).ok_or_else(unknown)?;
        if !info.serves(version) {
            return Err(unknown());
        }
        Ok(info)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KindInfo> {
        self.kinds.iter()
    }
}
