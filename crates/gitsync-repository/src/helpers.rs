//! Shared helpers for the adapters
//!
//! The git2 functions here rebuild trees bottom-up so that one write or delete
//! becomes exactly one commit on a branch, without needing a working tree.

use std::path::Path;

use git2::{BranchType, Commit, ObjectType, Oid, Repository, Signature, Tree};

use crate::{Error, RepositoryConfig, Result};

/// Run blocking filesystem or git2 work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Reject mutations on read-only bindings.
pub(crate) fn ensure_writable(config: &RepositoryConfig) -> Result<()> {
    if config.spec.read_only {
        return Err(Error::ReadOnly {
            name: config.name.clone(),
        });
    }
    Ok(())
}

/// Open a repository given a filesystem path or `file://` URL.
pub fn open(url: &str) -> Result<Repository> {
    let location = url.strip_prefix("file://").unwrap_or(url);
    Ok(Repository::open(Path::new(location))?)
}

/// Tip commit of a local branch, `None` when the branch does not exist.
pub fn branch_tip<'r>(repo: &'r Repository, branch: &str) -> Result<Option<Commit<'r>>> {
    match repo.find_branch(branch, BranchType::Local) {
        Ok(found) => Ok(Some(found.get().peel_to_commit()?)),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a branch name, tag name or commit hash to a commit.
pub fn resolve_commit<'r>(repo: &'r Repository, git_ref: &str) -> Result<Commit<'r>> {
    if let Some(commit) = branch_tip(repo, git_ref)? {
        return Ok(commit);
    }
    repo.revparse_single(git_ref)
        .and_then(|object| object.peel_to_commit())
        .map_err(|_| Error::RefNotFound {
            name: git_ref.to_string(),
        })
}

/// Return a copy of `base` (or an empty tree) with `blob` stored at `segments`.
pub fn upsert_path(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    segments: &[&str],
    blob: Oid,
) -> Result<Oid> {
    let mut builder = repo.treebuilder(base)?;
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Err(Error::config("path", "cannot write to the repository root")),
    };

    if rest.is_empty() {
        if let Some(existing) = base.and_then(|tree| tree.get_name(head))
            && existing.kind() == Some(ObjectType::Tree)
        {
            return Err(Error::Conflict {
                path: (*head).to_string(),
                message: "a directory exists at this path".into(),
            });
        }
        builder.insert(*head, blob, 0o100644)?;
        return Ok(builder.write()?);
    }

    let child = match base.and_then(|tree| tree.get_name(head)) {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => Some(repo.find_tree(entry.id())?),
        Some(_) => {
            return Err(Error::Conflict {
                path: (*head).to_string(),
                message: "a file exists where a directory is needed".into(),
            });
        }
        None => None,
    };
    let child_id = upsert_path(repo, child.as_ref(), rest, blob)?;
    builder.insert(*head, child_id, 0o040000)?;
    Ok(builder.write()?)
}

/// Return a copy of `base` without the entry at `segments`.
///
/// `Ok(None)` when nothing exists there. Directories left empty are dropped,
/// since git cannot record them.
pub fn remove_path(repo: &Repository, base: &Tree<'_>, segments: &[&str]) -> Result<Option<Oid>> {
    let Some((head, rest)) = segments.split_first() else {
        // Removing the root leaves an empty tree.
        return Ok(Some(repo.treebuilder(None)?.write()?));
    };
    let Some(entry) = base.get_name(head) else {
        return Ok(None);
    };

    let mut builder = repo.treebuilder(Some(base))?;
    if rest.is_empty() {
        builder.remove(*head)?;
        return Ok(Some(builder.write()?));
    }
    if entry.kind() != Some(ObjectType::Tree) {
        return Ok(None);
    }
    let child = repo.find_tree(entry.id())?;
    let Some(child_id) = remove_path(repo, &child, rest)? else {
        return Ok(None);
    };
    if repo.find_tree(child_id)?.is_empty() {
        builder.remove(*head)?;
    } else {
        builder.insert(*head, child_id, 0o040000)?;
    }
    Ok(Some(builder.write()?))
}

/// Commit `tree` on top of `parent` and move `refs/heads/{branch}` to it.
pub fn commit_on_branch(
    repo: &Repository,
    branch: &str,
    parent: Option<&Commit<'_>>,
    tree: Oid,
    message: &str,
) -> Result<Oid> {
    let tree = repo.find_tree(tree)?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now("gitsync", "gitsync@localhost"))?;
    let parents: Vec<&Commit<'_>> = parent.into_iter().collect();
    let refname = format!("refs/heads/{branch}");
    let id = repo.commit(Some(&refname), &signature, &signature, message, &tree, &parents)?;
    tracing::debug!(branch = %branch, commit = %id, "created commit");
    Ok(id)
}
