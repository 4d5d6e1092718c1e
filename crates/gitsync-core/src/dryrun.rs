//! Dry-run validation against the resource store

use std::sync::Arc;

use gitsync_resources::{MutationOptions, ResourceObject, ResourceStore};

use crate::{Error, Result};

/// A resource that passed every store check.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The object as the store would persist it.
    pub object: ResourceObject,
    /// Whether the mutation would be an update of an existing object.
    pub exists: bool,
}

/// Runs the store's mutation path without persisting.
#[derive(Clone)]
pub struct DryRunValidator {
    store: Arc<dyn ResourceStore>,
}

impl std::fmt::Debug for DryRunValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DryRunValidator").finish_non_exhaustive()
    }
}

impl DryRunValidator {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Validate `object` as a provisioning write.
    ///
    /// Issues an update when the object already exists and a create
    /// otherwise, both in dry-run mode.
    ///
    /// # Errors
    ///
    /// `Error::Validation` when admission rejects the object; store errors
    /// (conflict, forbidden) are passed through.
    pub async fn try_apply(&self, object: &ResourceObject) -> Result<Validated> {
        let options = MutationOptions::provisioning().dry_run();
        let key = object.key();
        let exists = match self.store.get(&key).await {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err.into()),
        };

        let mut candidate = object.clone();
        candidate.metadata.resource_version = None;
        let result = if exists {
            self.store.update(candidate, &options).await
        } else {
            self.store.create(candidate, &options).await
        };

        match result {
            Ok(object) => Ok(Validated { object, exists }),
            Err(err @ gitsync_resources::Error::Invalid { .. }) => {
                tracing::debug!(resource = %key, error = %err, "dry run rejected resource");
                Err(Error::Validation {
                    messages: vec![err.to_string()],
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
