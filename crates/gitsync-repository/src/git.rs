//! Plain git repository adapter
//!
//! Reads come from the tip of the configured branch (or an explicit ref).
//! Each write or delete becomes one commit on the target branch; no working
//! tree is touched, so bare repositories work as well as checkouts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::{BranchType, ObjectType, TreeWalkMode, TreeWalkResult};
use gitsync_fs::RelativePath;

use crate::helpers::{self, blocking, ensure_writable};
use crate::provider::{FileInfo, Ref, Repository, TreeEntry, TreeListing, WriteMode};
use crate::{Connection, Error, GitConfig, RepositoryConfig, Result};

/// Adapter over a git repository reachable on the local filesystem.
#[derive(Debug, Clone)]
pub struct GitRepository {
    config: RepositoryConfig,
    git: GitConfig,
    // Serializes commit creation; git2 handles are opened per call.
    commit_lock: Arc<Mutex<()>>,
}

impl GitRepository {
    /// Build the adapter.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the binding is not a git one.
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        let git = match config.spec.connection()? {
            Connection::Git(git) => git.clone(),
            _ => return Err(Error::config("spec.type", "expected a git repository")),
        };
        Ok(Self {
            config,
            git,
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn branch(&self) -> &str {
        &self.git.branch
    }

    fn target_branch(&self, git_ref: Option<&str>) -> String {
        git_ref.unwrap_or(&self.git.branch).to_string()
    }

    /// Apply a tree edit and commit it on `branch`.
    ///
    /// A branch that does not exist yet is started from the configured branch.
    async fn commit_change<F>(&self, branch: String, message: String, edit: F) -> Result<()>
    where
        F: FnOnce(&git2::Repository, Option<&git2::Tree<'_>>) -> Result<git2::Oid> + Send + 'static,
    {
        let url = self.git.url.clone();
        let default_branch = self.git.branch.clone();
        let lock = Arc::clone(&self.commit_lock);
        blocking(move || {
            let _guard = lock.lock().map_err(|_| Error::Task {
                message: "commit lock poisoned".into(),
            })?;
            let repo = helpers::open(&url)?;
            let parent = match helpers::branch_tip(&repo, &branch)? {
                Some(tip) => Some(tip),
                None => helpers::branch_tip(&repo, &default_branch)?,
            };
            let base = parent.as_ref().map(|c| c.tree()).transpose()?;
            let tree = edit(&repo, base.as_ref())?;
            if base.as_ref().is_some_and(|b| b.id() == tree) {
                tracing::debug!(branch = %branch, "tree unchanged, skipping commit");
                return Ok(());
            }
            helpers::commit_on_branch(&repo, &branch, parent.as_ref(), tree, &message)?;
            Ok(())
        })
        .await
    }
}

fn to_segments(path: &RelativePath) -> Vec<String> {
    path.segments().map(str::to_string).collect()
}

#[async_trait]
impl Repository for GitRepository {
    fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    async fn read(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<FileInfo> {
        let url = self.git.url.clone();
        let target = self.target_branch(git_ref);
        let path = path.clone();
        blocking(move || {
            let repo = helpers::open(&url)?;
            let commit = helpers::resolve_commit(&repo, &target)?;
            let tree = commit.tree()?;
            let entry = tree
                .get_path(Path::new(path.as_str()))
                .map_err(|_| Error::not_found(&path))?;
            if entry.kind() != Some(ObjectType::Blob) {
                return Err(Error::not_found(&path));
            }
            let blob = repo.find_blob(entry.id())?;
            Ok(FileInfo {
                path,
                data: blob.content().to_vec(),
                hash: blob.id().to_string(),
                git_ref: Some(target),
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
        message: &str,
    ) -> Result<()> {
        ensure_writable(&self.config)?;
        if path.is_dir() {
            return Err(Error::Conflict {
                path: path.to_string(),
                message: "cannot write to a directory path".into(),
            });
        }
        let segments = to_segments(path);
        let display = path.to_string();
        self.commit_change(
            self.target_branch(git_ref),
            message.to_string(),
            move |repo, base| {
                let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
                let exists = base
                    .and_then(|tree| tree.get_path(Path::new(&segments.join("/"))).ok())
                    .is_some_and(|entry| entry.kind() == Some(ObjectType::Blob));
                match (mode, exists) {
                    (WriteMode::Create, true) => {
                        return Err(Error::AlreadyExists { path: display });
                    }
                    (WriteMode::Update, false) => return Err(Error::not_found(display)),
                    _ => {}
                }
                let blob = repo.blob(&data)?;
                helpers::upsert_path(repo, base, &refs, blob)
            },
        )
        .await
    }

    async fn delete(&self, path: &RelativePath, git_ref: Option<&str>, message: &str) -> Result<()> {
        ensure_writable(&self.config)?;
        let segments = to_segments(path);
        let display = path.to_string();
        let is_dir = path.is_dir();
        self.commit_change(
            self.target_branch(git_ref),
            message.to_string(),
            move |repo, base| {
                let base = base.ok_or_else(|| Error::not_found(&display))?;
                if !segments.is_empty() {
                    let entry = base
                        .get_path(Path::new(&segments.join("/")))
                        .map_err(|_| Error::not_found(&display))?;
                    let found_dir = entry.kind() == Some(ObjectType::Tree);
                    if found_dir != is_dir {
                        return Err(Error::not_found(&display));
                    }
                }
                let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
                helpers::remove_path(repo, base, &refs)?.ok_or_else(|| Error::not_found(&display))
            },
        )
        .await
    }

    async fn list_tree(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<TreeListing> {
        let url = self.git.url.clone();
        let target = self.target_branch(git_ref);
        let base = path.as_dir();
        // git2 objects are not Send; the walk is materialized inside the blocking task.
        let entries = blocking(move || {
            let repo = helpers::open(&url)?;
            let commit = helpers::resolve_commit(&repo, &target)?;
            let root = commit.tree()?;
            let tree = if base.is_root() {
                root
            } else {
                let entry = root
                    .get_path(Path::new(base.as_str().trim_end_matches('/')))
                    .map_err(|_| Error::not_found(&base))?;
                repo.find_tree(entry.id())
                    .map_err(|_| Error::not_found(&base))?
            };

            let mut entries = Vec::new();
            let mut failure = None;
            let walked = tree.walk(TreeWalkMode::PreOrder, |parent, entry| {
                let Some(name) = entry.name() else {
                    return TreeWalkResult::Skip;
                };
                let is_dir = entry.kind() == Some(ObjectType::Tree);
                let relative = format!("{}{parent}{name}{}", base.as_str(), if is_dir { "/" } else { "" });
                let path = match RelativePath::parse(&relative) {
                    Ok(path) => path,
                    Err(err) => {
                        tracing::warn!(path = %relative, error = %err, "skipping unaddressable git entry");
                        return TreeWalkResult::Skip;
                    }
                };
                let size = if is_dir {
                    0
                } else {
                    match repo.find_blob(entry.id()) {
                        Ok(blob) => blob.size() as u64,
                        Err(err) => {
                            failure = Some(err);
                            return TreeWalkResult::Abort;
                        }
                    }
                };
                entries.push(TreeEntry {
                    path,
                    is_dir,
                    size,
                    hash: Some(entry.id().to_string()),
                });
                TreeWalkResult::Ok
            });
            if let Some(err) = failure {
                return Err(err.into());
            }
            walked?;
            Ok(entries)
        })
        .await?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    async fn list_refs(&self) -> Result<Vec<Ref>> {
        let url = self.git.url.clone();
        blocking(move || {
            let repo = helpers::open(&url)?;
            let mut refs = Vec::new();
            for branch in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = branch?;
                let Some(name) = branch.name()?.map(str::to_string) else {
                    continue;
                };
                let hash = branch.get().peel_to_commit()?.id().to_string();
                refs.push(Ref {
                    ref_url: format!("{url}#{name}"),
                    name,
                    hash,
                });
            }
            refs.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(refs)
        })
        .await
    }

    async fn validate(&self) -> Result<()> {
        let url = self.git.url.clone();
        let branch = self.git.branch.clone();
        blocking(move || {
            let repo = helpers::open(&url)
                .map_err(|e| Error::config("spec.git.url", format!("cannot open repository: {e}")))?;
            if helpers::branch_tip(&repo, &branch)?.is_none() {
                return Err(Error::config(
                    "spec.git.branch",
                    format!("branch '{branch}' does not exist"),
                ));
            }
            Ok(())
        })
        .await
    }
}
