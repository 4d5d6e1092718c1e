//! Local filesystem repository
//!
//! Files live directly under a root directory. Every request goes through
//! [`gitsync_fs::resolve`] so nothing outside the root is ever touched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gitsync_fs::checksum::compute_checksum;
use gitsync_fs::io::{self, RobustnessConfig};
use gitsync_fs::{NormalizedPath, RelativePath, RequestPath, ResolvedPath, RootPolicy};
use walkdir::WalkDir;

use crate::helpers::{blocking, ensure_writable};
use crate::provider::{FileInfo, Ref, Repository, TreeEntry, TreeListing, WriteMode};
use crate::{Connection, Error, RepositoryConfig, RepositoryType, Result};

/// Adapter over a plain directory.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    config: RepositoryConfig,
    root: PathBuf,
}

impl LocalRepository {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the binding is not a local one.
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        let root = match config.spec.connection()? {
            Connection::Local(local) => local.path.clone(),
            _ => return Err(Error::config("spec.type", "expected a local repository")),
        };
        Ok(Self { config, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unversioned(&self, git_ref: Option<&str>) -> Result<()> {
        match git_ref {
            Some(_) => Err(Error::VersionedUnsupported {
                kind: RepositoryType::Local,
            }),
            None => Ok(()),
        }
    }
}

fn resolve(root: &Path, path: &RelativePath, policy: RootPolicy) -> Result<ResolvedPath> {
    let request = RequestPath::from_segments(path.segments(), path.is_dir());
    Ok(gitsync_fs::resolve(root, &request, policy)?)
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::Fs(gitsync_fs::Error::io(path, err))
}

#[async_trait]
impl Repository for LocalRepository {
    fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn versioned(&self) -> bool {
        false
    }

    async fn read(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<FileInfo> {
        self.unversioned(git_ref)?;
        let root = self.root.clone();
        let path = path.clone();
        blocking(move || {
            let resolved = resolve(&root, &path, RootPolicy::Deny)?;
            if resolved.is_dir() || !resolved.absolute.is_file() {
                return Err(Error::not_found(&path));
            }
            let data = io::read_bytes(&NormalizedPath::new(&resolved.absolute))?;
            Ok(FileInfo {
                hash: compute_checksum(&data),
                path: resolved.relative,
                data,
                git_ref: None,
            })
        })
        .await
    }

    async fn write(
        &self,
        path: &RelativePath,
        data: Vec<u8>,
        mode: WriteMode,
        git_ref: Option<&str>,
        _message: &str,
    ) -> Result<()> {
        self.unversioned(git_ref)?;
        ensure_writable(&self.config)?;
        let root = self.root.clone();
        let path = path.clone();
        blocking(move || {
            let resolved = resolve(&root, &path, RootPolicy::Deny)?;
            if resolved.is_dir() {
                return Err(Error::Conflict {
                    path: path.to_string(),
                    message: "cannot write to a directory path".into(),
                });
            }
            let target = &resolved.absolute;
            if target.is_dir() {
                return Err(Error::Conflict {
                    path: path.to_string(),
                    message: "a directory exists at this path".into(),
                });
            }
            match (mode, target.exists()) {
                (WriteMode::Create, true) => {
                    return Err(Error::AlreadyExists {
                        path: path.to_string(),
                    });
                }
                (WriteMode::Update, false) => return Err(Error::not_found(&path)),
                _ => {}
            }
            io::write_atomic(&NormalizedPath::new(target), &data, RobustnessConfig::default())?;
            tracing::debug!(path = %path, bytes = data.len(), "wrote local file");
            Ok(())
        })
        .await
    }

    async fn delete(
        &self,
        path: &RelativePath,
        git_ref: Option<&str>,
        _message: &str,
    ) -> Result<()> {
        self.unversioned(git_ref)?;
        ensure_writable(&self.config)?;
        let root = self.root.clone();
        let path = path.clone();
        blocking(move || {
            let resolved = resolve(&root, &path, RootPolicy::Allow)?;
            let target = &resolved.absolute;
            if !path.is_dir() {
                if !target.is_file() {
                    return Err(Error::not_found(&path));
                }
                io::remove_file(&NormalizedPath::new(target))?;
                tracing::debug!(path = %path, "deleted local file");
                return Ok(());
            }

            if !target.is_dir() {
                return Err(Error::not_found(&path));
            }
            if path.is_root() {
                // Keep the root itself; it is the repository.
                let entries = std::fs::read_dir(target).map_err(|e| io_error(target, e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| io_error(target, e))?;
                    let child = entry.path();
                    if child.is_dir() {
                        io::remove_dir_all(&NormalizedPath::new(&child))?;
                    } else {
                        std::fs::remove_file(&child).map_err(|e| io_error(&child, e))?;
                    }
                }
            } else {
                io::remove_dir_all(&NormalizedPath::new(target))?;
            }
            tracing::debug!(path = %path, "deleted local directory");
            Ok(())
        })
        .await
    }

    async fn list_tree(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<TreeListing> {
        self.unversioned(git_ref)?;
        let base = path.as_dir();
        let resolved = {
            let root = self.root.clone();
            let base = base.clone();
            blocking(move || resolve(&root, &base, RootPolicy::Allow)).await?
        };
        if !resolved.absolute.is_dir() {
            return Err(Error::not_found(&base));
        }

        let start = resolved.absolute;
        let walker = WalkDir::new(&start)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(io::is_lock_sidecar(&name) || (name.starts_with('.') && name.ends_with(".tmp")))
            });

        let listing = walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let at = err.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(Err(io_error(&at, err.into())));
                }
            };
            let relative = entry.path().strip_prefix(&start).ok()?;
            let mut current = base.clone();
            let is_dir = entry.file_type().is_dir();
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let last = components.len().saturating_sub(1);
            for (idx, segment) in components.iter().enumerate() {
                current = match current.child(segment, idx < last || is_dir) {
                    Ok(next) => next,
                    Err(err) => {
                        tracing::warn!(path = %entry.path().display(), error = %err, "skipping unaddressable entry");
                        return None;
                    }
                };
            }
            let size = if is_dir {
                0
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            };
            Some(Ok(TreeEntry {
                path: current,
                is_dir,
                size,
                hash: None,
            }))
        });
        Ok(Box::new(listing))
    }

    async fn list_refs(&self) -> Result<Vec<Ref>> {
        Err(Error::VersionedUnsupported {
            kind: RepositoryType::Local,
        })
    }

    async fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::config(
                "spec.local.path",
                format!("{} is not a directory", self.root.display()),
            ));
        }
        Ok(())
    }
}
