//! Hosted git providers (GitHub, GitLab, Bitbucket)
//!
//! The network API of each provider lives behind [`ProviderClient`]. This
//! module maps that client onto the [`Repository`] capability set, retries
//! idempotent reads on transient failures, and builds provider-specific
//! ref URLs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use gitsync_fs::RelativePath;

use crate::helpers::ensure_writable;
use crate::provider::{FileInfo, Ref, Repository, TreeEntry, TreeListing, WriteMode};
use crate::{Connection, Error, HostedConfig, RepositoryConfig, RepositoryType, Result};

/// Hosted provider flavour; decides URL shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl Provider {
    pub fn from_type(kind: RepositoryType) -> Option<Self> {
        match kind {
            RepositoryType::GitHub => Some(Self::GitHub),
            RepositoryType::GitLab => Some(Self::GitLab),
            RepositoryType::Bitbucket => Some(Self::Bitbucket),
            RepositoryType::Local | RepositoryType::Git => None,
        }
    }

    pub fn repository_type(self) -> RepositoryType {
        match self {
            Self::GitHub => RepositoryType::GitHub,
            Self::GitLab => RepositoryType::GitLab,
            Self::Bitbucket => RepositoryType::Bitbucket,
        }
    }

    /// Browser URL for a branch or tag.
    pub fn ref_url(self, base: &str, name: &str) -> String {
        match self {
            Self::GitHub => format!("{base}/tree/{name}"),
            Self::GitLab => format!("{base}/-/tree/{name}"),
            Self::Bitbucket => format!("{base}/src/{name}"),
        }
    }
}

/// Failure reported by a provider client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Timeouts, rate limits and 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

/// A file as returned by the provider contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub data: Vec<u8>,
    /// Blob sha as reported by the provider.
    pub sha: String,
}

/// One entry of a provider tree listing, path relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    pub name: String,
    pub sha: String,
}

/// Network client for one hosted repository.
///
/// Implementations own authentication; the engine never sees credentials.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn get_file(&self, path: &str, git_ref: &str) -> std::result::Result<RemoteFile, ClientError>;

    /// Create or replace a file. `previous` is the sha being replaced.
    async fn put_file(
        &self,
        path: &str,
        data: &[u8],
        branch: &str,
        message: &str,
        previous: Option<&str>,
    ) -> std::result::Result<(), ClientError>;

    async fn delete_file(
        &self,
        path: &str,
        branch: &str,
        message: &str,
        previous: &str,
    ) -> std::result::Result<(), ClientError>;

    /// Recursive listing below `path` (empty for the root).
    async fn list_tree(&self, path: &str, git_ref: &str)
    -> std::result::Result<Vec<RemoteEntry>, ClientError>;

    async fn list_branches(&self) -> std::result::Result<Vec<RemoteBranch>, ClientError>;

    /// Check reachability and access to the repository.
    async fn check(&self) -> std::result::Result<(), ClientError>;
}

/// Bounds on read retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

/// Adapter for the hosted providers.
#[derive(Clone)]
pub struct HostedRepository {
    config: RepositoryConfig,
    provider: Provider,
    hosted: HostedConfig,
    client: Arc<dyn ProviderClient>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HostedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedRepository")
            .field("name", &self.config.name)
            .field("provider", &self.provider)
            .field("url", &self.hosted.url)
            .finish_non_exhaustive()
    }
}

impl HostedRepository {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the binding is not a hosted one.
    pub fn new(config: RepositoryConfig, client: Arc<dyn ProviderClient>) -> Result<Self> {
        let (provider, hosted) = match config.spec.connection()? {
            Connection::Hosted(kind, hosted) => match Provider::from_type(kind) {
                Some(provider) => (provider, hosted.clone()),
                None => return Err(Error::config("spec.type", "expected a hosted repository")),
            },
            _ => return Err(Error::config("spec.type", "expected a hosted repository")),
        };
        Ok(Self {
            config,
            provider,
            hosted,
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn target_ref<'a>(&'a self, git_ref: Option<&'a str>) -> &'a str {
        git_ref.unwrap_or(&self.hosted.branch)
    }

    fn remote_path(path: &RelativePath) -> &str {
        path.as_str().trim_end_matches('/')
    }

    /// Fetch a file, retrying transient failures.
    async fn fetch(&self, path: &str, git_ref: &str) -> std::result::Result<RemoteFile, ClientError> {
        backoff::future::retry(self.retry.backoff(), || async {
            self.client.get_file(path, git_ref).await.map_err(|err| {
                if matches!(err, ClientError::Transient(_)) {
                    tracing::debug!(path = %path, error = %err, "retrying transient read failure");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await
    }

    /// `Ok(None)` when the file does not exist.
    async fn existing_sha(&self, path: &str, git_ref: &str) -> Result<Option<String>> {
        match self.fetch(path, git_ref).await {
            Ok(file) => Ok(Some(file.sha)),
            Err(ClientError::NotFound) => Ok(None),
            Err(err) => Err(map_client_error(err, path)),
        }
    }
}

fn map_client_error(err: ClientError, path: &str) -> Error {
    match err {
        ClientError::NotFound => Error::not_found(path),
        ClientError::Conflict(message) => Error::Conflict {
            path: path.to_string(),
            message,
        },
        ClientError::Transient(message) => Error::Unavailable { message },
        ClientError::Unauthorized(message) => Error::Provider {
            message: format!("unauthorized: {message}"),
        },
        ClientError::Other(message) => Error::Provider { message },
    }
}

#[async_trait]
impl Repository for HostedRepository {
    fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    async fn read(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<FileInfo> {
        let target = self.target_ref(git_ref);
        let remote = Self::remote_path(path);
        let file = self
            .fetch(remote, target)
            .await
            .map_err(|err| map_client_error(err, remote))?;
        Ok(FileInfo {
            path: path.clone(),
            data: file.data,
            hash: file.sha,
            git_ref: Some(target.to_string()),
        })
    }

    async fn write(
        &self,
        path: &RelativePath,
        data: Vec<u8>,
        mode: WriteMode,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<()> {
        ensure_writable(&self.config)?;
        if path.is_dir() {
            return Err(Error::Conflict {
                path: path.to_string(),
                message: "cannot write to a directory path".into(),
            });
        }
        let branch = self.target_ref(git_ref);
        let remote = Self::remote_path(path);
        let previous = self.existing_sha(remote, branch).await?;
        match (mode, previous.is_some()) {
            (WriteMode::Create, true) => {
                return Err(Error::AlreadyExists {
                    path: path.to_string(),
                });
            }
            (WriteMode::Update, false) => return Err(Error::not_found(path)),
            _ => {}
        }
        self.client
            .put_file(remote, &data, branch, message, previous.as_deref())
            .await
            .map_err(|err| map_client_error(err, remote))?;
        tracing::debug!(provider = ?self.provider, path = %path, branch = %branch, "wrote hosted file");
        Ok(())
    }

    async fn delete(&self, path: &RelativePath, git_ref: Option<&str>, message: &str) -> Result<()> {
        ensure_writable(&self.config)?;
        let branch = self.target_ref(git_ref);
        if !path.is_dir() {
            let remote = Self::remote_path(path);
            let sha = self
                .existing_sha(remote, branch)
                .await?
                .ok_or_else(|| Error::not_found(path))?;
            return self
                .client
                .delete_file(remote, branch, message, &sha)
                .await
                .map_err(|err| map_client_error(err, remote));
        }

        // Providers have no directory delete; remove every file beneath it.
        let entries = self
            .client
            .list_tree(Self::remote_path(path), branch)
            .await
            .map_err(|err| map_client_error(err, path.as_str()))?;
        let files: Vec<RemoteEntry> = entries.into_iter().filter(|e| !e.is_dir).collect();
        if files.is_empty() {
            return Err(Error::not_found(path));
        }
        for file in files {
            self.client
                .delete_file(&file.path, branch, message, &file.sha)
                .await
                .map_err(|err| map_client_error(err, &file.path))?;
        }
        Ok(())
    }

    async fn list_tree(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<TreeListing> {
        let target = self.target_ref(git_ref).to_string();
        let base = path.as_dir();
        let entries = backoff::future::retry(self.retry.backoff(), || async {
            self.client
                .list_tree(Self::remote_path(&base), &target)
                .await
                .map_err(|err| match err {
                    ClientError::Transient(_) => backoff::Error::transient(err),
                    other => backoff::Error::permanent(other),
                })
        })
        .await
        .map_err(|err| map_client_error(err, base.as_str()))?;

        let listing = entries.into_iter().filter_map(|entry| {
            let raw = if entry.is_dir {
                format!("{}/", entry.path.trim_end_matches('/'))
            } else {
                entry.path.clone()
            };
            match RelativePath::parse(&raw) {
                Ok(path) => Some(Ok(TreeEntry {
                    path,
                    is_dir: entry.is_dir,
                    size: entry.size,
                    hash: Some(entry.sha),
                })),
                Err(err) => {
                    tracing::warn!(path = %raw, error = %err, "skipping unaddressable remote entry");
                    None
                }
            }
        });
        Ok(Box::new(listing))
    }

    async fn list_refs(&self) -> Result<Vec<Ref>> {
        let branches = self
            .client
            .list_branches()
            .await
            .map_err(|err| map_client_error(err, ""))?;
        Ok(branches
            .into_iter()
            .map(|branch| Ref {
                ref_url: self.provider.ref_url(&self.hosted.url, &branch.name),
                name: branch.name,
                hash: branch.sha,
            })
            .collect())
    }

    async fn validate(&self) -> Result<()> {
        self.client.check().await.map_err(|err| {
            Error::config(
                format!("spec.{}.url", self.provider.repository_type()),
                format!("repository is not reachable: {err}"),
            )
        })
    }
}
