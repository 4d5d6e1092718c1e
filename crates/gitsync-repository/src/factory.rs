//! Builds the adapter matching a repository binding

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::hosted::{HostedRepository, Provider, ProviderClient, RetryPolicy};
use crate::{
    Connection, Error, GitRepository, LocalRepository, Repository, RepositoryConfig, Result,
};

/// Constructs a client bound to one hosted repository.
pub type ClientBuilder =
    Arc<dyn Fn(&RepositoryConfig) -> Result<Arc<dyn ProviderClient>> + Send + Sync>;

/// Dispatches a [`RepositoryConfig`] to the adapter for its type.
#[derive(Clone, Default)]
pub struct AdapterFactory {
    clients: HashMap<Provider, ClientBuilder>,
    allowed_local_roots: Vec<PathBuf>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .field("allowed_local_roots", &self.allowed_local_roots)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client constructor for a hosted provider.
    pub fn with_client(mut self, provider: Provider, builder: ClientBuilder) -> Self {
        self.clients.insert(provider, builder);
        self
    }

    /// Restrict local repositories to these directories. Empty allows any.
    pub fn with_allowed_local_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.allowed_local_roots = roots;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn check_local_root(&self, path: &std::path::Path) -> Result<()> {
        if self.allowed_local_roots.is_empty() {
            return Ok(());
        }
        let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let allowed = self.allowed_local_roots.iter().any(|root| {
            let root = dunce::canonicalize(root).unwrap_or_else(|_| root.clone());
            canonical.starts_with(root)
        });
        if allowed {
            Ok(())
        } else {
            Err(Error::config(
                "spec.local.path",
                format!("{} is not under an allowed root", path.display()),
            ))
        }
    }

    /// Build the adapter for `config`.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the binding is invalid, a local path is outside
    /// the allowed roots, or no client is registered for a hosted provider.
    pub fn build(&self, config: &RepositoryConfig) -> Result<Arc<dyn Repository>> {
        config.validate()?;
        match config.spec.connection()? {
            Connection::Local(local) => {
                self.check_local_root(&local.path)?;
                Ok(Arc::new(LocalRepository::new(config.clone())?))
            }
            Connection::Git(_) => Ok(Arc::new(GitRepository::new(config.clone())?)),
            Connection::Hosted(kind, _) => {
                let provider = Provider::from_type(kind)
                    .ok_or_else(|| Error::config("spec.type", "not a hosted provider"))?;
                let builder = self.clients.get(&provider).ok_or_else(|| {
                    Error::config(
                        format!("spec.{kind}"),
                        format!("no client registered for {kind}"),
                    )
                })?;
                let client = builder(config)?;
                Ok(Arc::new(
                    HostedRepository::new(config.clone(), client)?.with_retry(self.retry),
                ))
            }
        }
    }
}
