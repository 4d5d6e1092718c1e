//! Repository bindings for gitsync
//!
//! A [`RepositoryConfig`] declares where files live; a [`Repository`]
//! adapter gives uniform file, tree and ref access over that backing store.
//! Variants: local filesystem, plain git (via `git2`), and the hosted
//! providers (GitHub, GitLab, Bitbucket) behind a [`ProviderClient`].

pub mod error;
pub mod factory;
pub mod git;
mod helpers;
pub mod hosted;
pub mod local;
pub mod provider;
pub mod types;

pub use error::{Error, Result};
pub use factory::AdapterFactory;
pub use git::GitRepository;
pub use hosted::{
    ClientError, HostedRepository, Provider, ProviderClient, RemoteBranch, RemoteEntry,
    RemoteFile, RetryPolicy,
};
pub use local::LocalRepository;
pub use provider::{
    FileInfo, FileTreeNode, Ref, Repository, TreeEntry, TreeListing, WriteMode, tree_node,
};
pub use types::{
    Connection, GitConfig, HostedConfig, LocalConfig, RepositoryConfig, RepositorySpec,
    RepositoryType, SyncPolicy, SyncTarget, normalize_url,
};
