//! Registered repositories and their adapters

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gitsync_repository::{Repository, RepositoryConfig};

use crate::{Error, Result};

/// Name-keyed set of live repository adapters.
#[derive(Default)]
pub struct RepositoryRegistry {
    entries: RwLock<BTreeMap<String, Arc<dyn Repository>>>,
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("names", &self.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<dyn Repository>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn Repository>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an adapter under its configured name.
    ///
    /// # Errors
    ///
    /// `Error::AlreadyExists` when the name is taken.
    pub fn insert(&self, adapter: Arc<dyn Repository>) -> Result<()> {
        let name = adapter.config().name.clone();
        let mut entries = self.write();
        if entries.contains_key(&name) {
            return Err(Error::AlreadyExists {
                what: format!("repository {name}"),
            });
        }
        entries.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Repository>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("repository {name}")))
    }

    pub fn remove(&self, name: &str) -> Result<Arc<dyn Repository>> {
        self.write()
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("repository {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Configurations of every registered repository, by name.
    pub fn configs(&self) -> Vec<RepositoryConfig> {
        self.read().values().map(|repo| repo.config().clone()).collect()
    }
}
