//! Repository adapter trait
//!
//! Every backing store exposes the same capability set. Paths are always
//! validated [`RelativePath`]s; resolution against a filesystem root happens
//! inside the adapter that owns one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use gitsync_fs::RelativePath;
use serde::Serialize;

use crate::{RepositoryConfig, Result};

/// A file read from a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: RelativePath,
    pub data: Vec<u8>,
    /// Content identity: blob id for git-backed stores, sha256 otherwise.
    pub hash: String,
    /// Ref the content was read from, when the store is versioned.
    pub git_ref: Option<String>,
}

/// Existence precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` when the file exists.
    Create,
    /// Fail with `NotFound` when the file does not exist.
    Update,
    /// Write regardless.
    Upsert,
}

/// One entry of a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: RelativePath,
    pub is_dir: bool,
    pub size: u64,
    pub hash: Option<String>,
}

/// Lazily produced tree entries, parents before children.
pub type TreeListing = Box<dyn Iterator<Item = Result<TreeEntry>> + Send>;

/// A branch or tag projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ref {
    pub name: String,
    pub hash: String,
    pub ref_url: String,
}

/// Materialized view of a listing, for callers that want a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTreeNode {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

/// Uniform file, tree and ref access over one backing store.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Binding this adapter was built from.
    fn config(&self) -> &RepositoryConfig;

    /// Whether refs and `git_ref` arguments are meaningful.
    fn versioned(&self) -> bool {
        true
    }

    async fn read(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<FileInfo>;

    async fn write(
        &self,
        path: &RelativePath,
        data: Vec<u8>,
        mode: WriteMode,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<()>;

    /// Delete a file, or every file below a directory path.
    async fn delete(&self, path: &RelativePath, git_ref: Option<&str>, message: &str)
    -> Result<()>;

    /// List everything below `path` (a directory, or the root).
    async fn list_tree(&self, path: &RelativePath, git_ref: Option<&str>) -> Result<TreeListing>;

    async fn list_refs(&self) -> Result<Vec<Ref>>;

    /// Check that the backing store is reachable and matches the config.
    async fn validate(&self) -> Result<()>;
}

/// Fold a listing into a tree rooted at `root`.
pub fn tree_node(root: &RelativePath, listing: TreeListing) -> Result<FileTreeNode> {
    let mut nodes: BTreeMap<RelativePath, FileTreeNode> = BTreeMap::new();
    for entry in listing {
        let entry = entry?;
        nodes.insert(
            entry.path.clone(),
            FileTreeNode {
                path: entry.path.as_str().to_string(),
                is_dir: entry.is_dir,
                size: entry.size,
                hash: entry.hash,
                children: Vec::new(),
            },
        );
    }

    // Attach deepest entries first so each directory is complete when moved.
    let mut paths: Vec<RelativePath> = nodes.keys().cloned().collect();
    paths.sort_by_key(|p| std::cmp::Reverse(p.depth()));

    let mut top = Vec::new();
    for path in paths {
        let Some(node) = nodes.remove(&path) else {
            continue;
        };
        match path.parent().filter(|parent| nodes.contains_key(parent)) {
            Some(parent) => {
                if let Some(parent) = nodes.get_mut(&parent) {
                    parent.children.push(node);
                }
            }
            None => top.push(node),
        }
    }

    sort_children(&mut top);
    Ok(FileTreeNode {
        path: root.as_str().to_string(),
        is_dir: true,
        size: 0,
        hash: None,
        children: top,
    })
}

fn sort_children(nodes: &mut [FileTreeNode]) {
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    for node in nodes {
        sort_children(&mut node.children);
    }
}
