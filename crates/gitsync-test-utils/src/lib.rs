//! Shared test utilities for the gitsync workspace.
//!
//! Dev-dependency only. Kept free of workspace crates so any crate can use it
//! from its own unit tests without pulling in a second copy of itself.
//!
//! # Modules
//!
//! - [`fixtures`] — dashboard manifests and the files under `test-fixtures/`
//! - [`git`] — real git repositories with history, built with `git2`
//! - [`repo`] — [`TestDir`] scratch directories standing in for local repositories

pub mod fixtures;
pub mod git;
pub mod repo;

pub use repo::TestDir;
