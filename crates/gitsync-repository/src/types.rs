//! Repository binding data model
//!
//! A binding names one external source of files and how it is synced. The
//! connection section present must match `type`, and sections belonging to
//! other types must be absent.

use std::path::PathBuf;
use std::sync::LazyLock;

use gitsync_fs::RelativePath;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("static pattern is valid")
});

/// Backing store kind of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Local,
    Git,
    GitHub,
    GitLab,
    Bitbucket,
}

impl RepositoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Git => "git",
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Bitbucket => "bitbucket",
        }
    }

    /// Every type, in declaration order.
    pub fn all() -> [Self; 5] {
        [
            Self::Local,
            Self::Git,
            Self::GitHub,
            Self::GitLab,
            Self::Bitbucket,
        ]
    }
}

impl std::fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for a filesystem directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub path: PathBuf,
}

/// Connection settings for a plain git repository reachable on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    /// Location of the repository (a path or `file://` URL).
    pub url: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tokenRef")]
    pub token_ref: Option<String>,
}

/// Connection settings shared by the hosted providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedConfig {
    pub url: String,
    pub branch: String,
    /// Reference to a stored credential; never the credential itself.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tokenRef")]
    pub token_ref: Option<String>,
}

/// Where synced resources land in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    /// Top-level files become top-level resources.
    #[default]
    Instance,
    /// Everything is placed under a folder named after the repository.
    Folder,
}

/// The single sync policy of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target: SyncTarget,
    /// Directory inside the repository that holds synced files.
    #[serde(default = "RelativePath::root")]
    pub path: RelativePath,
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            target: SyncTarget::Instance,
            path: RelativePath::root(),
            interval_secs: 0,
        }
    }
}

/// Declared repository binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: RepositoryType,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<HostedConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<HostedConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitbucket: Option<HostedConfig>,
    #[serde(default)]
    pub sync: SyncPolicy,
}

/// The connection section selected by `type`.
#[derive(Debug, Clone, Copy)]
pub enum Connection<'a> {
    Local(&'a LocalConfig),
    Git(&'a GitConfig),
    Hosted(RepositoryType, &'a HostedConfig),
}

impl RepositorySpec {
    fn sections(&self) -> [(RepositoryType, bool); 5] {
        [
            (RepositoryType::Local, self.local.is_some()),
            (RepositoryType::Git, self.git.is_some()),
            (RepositoryType::GitHub, self.github.is_some()),
            (RepositoryType::GitLab, self.gitlab.is_some()),
            (RepositoryType::Bitbucket, self.bitbucket.is_some()),
        ]
    }

    /// The active connection section.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the section for `type` is missing.
    pub fn connection(&self) -> Result<Connection<'_>> {
        let missing = || Error::config(format!("spec.{}", self.kind), "section is required for this type");
        Ok(match self.kind {
            RepositoryType::Local => Connection::Local(self.local.as_ref().ok_or_else(missing)?),
            RepositoryType::Git => Connection::Git(self.git.as_ref().ok_or_else(missing)?),
            RepositoryType::GitHub => {
                Connection::Hosted(self.kind, self.github.as_ref().ok_or_else(missing)?)
            }
            RepositoryType::GitLab => {
                Connection::Hosted(self.kind, self.gitlab.as_ref().ok_or_else(missing)?)
            }
            RepositoryType::Bitbucket => {
                Connection::Hosted(self.kind, self.bitbucket.as_ref().ok_or_else(missing)?)
            }
        })
    }

    /// Branch that pulls read and pushes write unless a ref is given.
    pub fn branch(&self) -> Option<&str> {
        match self.connection().ok()? {
            Connection::Local(_) => None,
            Connection::Git(git) => Some(&git.branch),
            Connection::Hosted(_, hosted) => Some(&hosted.branch),
        }
    }

    /// Clean up user input before it is persisted.
    ///
    /// Hosted and git URLs lose trailing `/` and `.git`; the sync path is put
    /// in directory form.
    pub fn normalize(&mut self) {
        if let Some(git) = self.git.as_mut() {
            git.url = normalize_url(&git.url);
        }
        for hosted in [
            self.github.as_mut(),
            self.gitlab.as_mut(),
            self.bitbucket.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            hosted.url = normalize_url(&hosted.url);
        }
        self.sync.path = self.sync.path.as_dir();
    }

    /// Check field requirements for the declared type.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::config("spec.title", "title is required"));
        }
        for (kind, present) in self.sections() {
            if present && kind != self.kind {
                return Err(Error::config(
                    format!("spec.{kind}"),
                    format!("not allowed for repositories of type {}", self.kind),
                ));
            }
        }

        match self.connection()? {
            Connection::Local(local) => {
                if local.path.as_os_str().is_empty() {
                    return Err(Error::config("spec.local.path", "path is required"));
                }
            }
            Connection::Git(git) => {
                validate_remote("spec.git", &git.url, &git.branch, false)?;
            }
            Connection::Hosted(kind, hosted) => {
                validate_remote(&format!("spec.{kind}"), &hosted.url, &hosted.branch, true)?;
            }
        }
        Ok(())
    }
}

fn validate_remote(section: &str, url: &str, branch: &str, require_http: bool) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::config(format!("{section}.url"), "url is required"));
    }
    if require_http && !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(Error::config(
            format!("{section}.url"),
            "url must use http or https",
        ));
    }
    if branch.trim().is_empty() {
        return Err(Error::config(format!("{section}.branch"), "branch is required"));
    }
    if !git2::Reference::is_valid_name(&format!("refs/heads/{branch}")) {
        return Err(Error::config(
            format!("{section}.branch"),
            format!("invalid branch name '{branch}'"),
        ));
    }
    Ok(())
}

/// Strip trailing `/` and `.git` from a repository URL.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

/// A named repository binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub spec: RepositorySpec,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, spec: RepositorySpec) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            spec,
        }
    }

    /// Validate the name and the spec.
    pub fn validate(&self) -> Result<()> {
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(Error::config(
                "metadata.name",
                format!("'{}' is not a valid repository name", self.name),
            ));
        }
        self.spec.validate()
    }
}
