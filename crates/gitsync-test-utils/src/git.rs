//! Real git repositories for adapter tests.
//!
//! Everything goes through `git2`, so no `git` binary is needed.

use std::path::Path;

use git2::{Repository, RepositoryInitOptions, Signature};

/// Default branch of repositories created here.
pub const BRANCH: &str = "main";

fn signature() -> Signature<'static> {
    Signature::now("Test User", "test@test.com").unwrap()
}

/// Initialise a bare repository whose `main` branch holds `files`.
///
/// # Panics
/// Panics if any git operation fails.
pub fn bare_repo_with_files(path: &Path, files: &[(&str, &[u8])]) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head(BRANCH);
    let repo = Repository::init_opts(path, &opts)
        .unwrap_or_else(|e| panic!("bare_repo_with_files: init {}: {e}", path.display()));
    commit_files(&repo, files, "Initial commit");
    repo
}

/// Commit `files` on top of `main`, replacing existing paths.
///
/// # Panics
/// Panics if any git operation fails.
pub fn commit_files(repo: &Repository, files: &[(&str, &[u8])], message: &str) -> git2::Oid {
    let parent = repo
        .find_branch(BRANCH, git2::BranchType::Local)
        .ok()
        .map(|b| b.get().peel_to_commit().unwrap());
    let mut tree = parent.as_ref().map(|c| c.tree().unwrap());
    for (path, data) in files {
        let blob = repo.blob(data).unwrap();
        let segments: Vec<&str> = path.split('/').collect();
        let id = insert(repo, tree.as_ref(), &segments, blob);
        tree = Some(repo.find_tree(id).unwrap());
    }
    let tree = match tree {
        Some(tree) => tree,
        None => repo.find_tree(repo.treebuilder(None).unwrap().write().unwrap()).unwrap(),
    };
    let sig = signature();
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(
        Some(&format!("refs/heads/{BRANCH}")),
        &sig,
        &sig,
        message,
        &tree,
        &parents,
    )
    .unwrap()
}

fn insert(repo: &Repository, base: Option<&git2::Tree<'_>>, segments: &[&str], blob: git2::Oid) -> git2::Oid {
    let mut builder = repo.treebuilder(base).unwrap();
    let (head, rest) = segments.split_first().unwrap();
    if rest.is_empty() {
        builder.insert(*head, blob, 0o100644).unwrap();
    } else {
        let child = base
            .and_then(|t| t.get_name(head))
            .and_then(|e| repo.find_tree(e.id()).ok());
        let id = insert(repo, child.as_ref(), rest, blob);
        builder.insert(*head, id, 0o040000).unwrap();
    }
    builder.write().unwrap()
}

/// Create `name` pointing at the tip of `main`.
pub fn create_branch(repo: &Repository, name: &str) {
    let tip = repo
        .find_branch(BRANCH, git2::BranchType::Local)
        .unwrap()
        .get()
        .peel_to_commit()
        .unwrap();
    repo.branch(name, &tip, false).unwrap();
}

/// Read a file from the tip of `branch`, `None` when absent.
pub fn read_file(repo: &Repository, branch: &str, path: &str) -> Option<Vec<u8>> {
    let commit = repo
        .find_branch(branch, git2::BranchType::Local)
        .ok()?
        .get()
        .peel_to_commit()
        .ok()?;
    let entry = commit.tree().ok()?.get_path(Path::new(path)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    Some(blob.content().to_vec())
}

/// Number of commits reachable from `branch`.
pub fn commit_count(repo: &Repository, branch: &str) -> usize {
    let mut walk = repo.revwalk().unwrap();
    walk.push_ref(&format!("refs/heads/{branch}")).unwrap();
    walk.count()
}
