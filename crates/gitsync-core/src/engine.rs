//! Engine facade
//!
//! Wires the resource store, access control and adapter factory into the
//! repository registry, job controller and file service.

use std::sync::Arc;

use gitsync_repository::{AdapterFactory, RepositoryConfig};
use gitsync_resources::{Converter, MemoryStore, ResourceStore};
use uuid::Uuid;

use crate::access::{AccessControl, AllowAll, Caller, Operation, authorize};
use crate::apply::Applier;
use crate::config::EngineConfig;
use crate::export::Exporter;
use crate::files::FileService;
use crate::jobs::{Job, JobController, JobProgress, JobRunner, JobSpec, JobStore, WorkerPool};
use crate::planner::Planner;
use crate::registry::RepositoryRegistry;
use crate::{Error, Result};

/// Collects collaborators for an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ResourceStore>>,
    access: Option<Arc<dyn AccessControl>>,
    factory: AdapterFactory,
    converter: Converter,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Use `store` instead of a fresh [`MemoryStore`].
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `access` instead of allowing everything.
    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    /// Adapter factory, typically carrying hosted provider clients.
    pub fn with_factory(mut self, factory: AdapterFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_converter(mut self, converter: Converter) -> Self {
        self.converter = converter;
        self
    }

    /// # Errors
    ///
    /// Fails when the configuration is invalid or persisted jobs cannot be
    /// recovered.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::default()) as Arc<dyn ResourceStore>);
        let access = self.access.unwrap_or_else(|| Arc::new(AllowAll) as Arc<dyn AccessControl>);
        let factory = self
            .factory
            .with_allowed_local_roots(config.allowed_local_roots.clone())
            .with_retry(config.hosted_read_retries.policy());

        let repositories = Arc::new(RepositoryRegistry::new());
        let planner = Planner::new(Arc::clone(&store), self.converter.clone());
        let applier = Applier::new(Arc::clone(&store), config.item_concurrency);
        let exporter = Exporter::new(Arc::clone(&store), self.converter.clone());
        let runner = JobRunner::new(
            Arc::clone(&repositories),
            planner.clone(),
            applier.clone(),
            exporter,
        );
        let jobs = Arc::new(JobStore::open(config.jobs_dir.as_deref())?);
        let controller = JobController::new(
            Arc::clone(&jobs),
            Arc::clone(&repositories),
            Arc::clone(&access),
            runner,
        );
        let files = FileService::new(
            Arc::clone(&repositories),
            jobs,
            Arc::clone(&access),
            Arc::clone(&store),
            self.converter,
        );

        tracing::info!(
            workers = config.workers,
            item_concurrency = config.item_concurrency,
            persistent_jobs = config.jobs_dir.is_some(),
            "engine ready"
        );
        Ok(Engine {
            config,
            store,
            access,
            factory,
            repositories,
            planner,
            applier,
            controller,
            files,
        })
    }
}

/// Repository sync engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ResourceStore>,
    access: Arc<dyn AccessControl>,
    factory: AdapterFactory,
    repositories: Arc<RepositoryRegistry>,
    planner: Planner,
    applier: Applier,
    controller: JobController,
    files: FileService,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("repositories", &self.repositories)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn files(&self) -> &FileService {
        &self.files
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// Register a repository after checking its binding and reaching it.
    ///
    /// Returns the configuration as stored, after normalization.
    ///
    /// # Errors
    ///
    /// Input errors for invalid bindings, `AlreadyExists` for a taken name,
    /// and adapter errors when the backing store cannot be reached.
    pub async fn create_repository(
        &self,
        caller: &Caller,
        mut config: RepositoryConfig,
    ) -> Result<RepositoryConfig> {
        authorize(self.access.as_ref(), caller, Operation::ManageRepository, &config.name)?;
        config.spec.normalize();
        config.validate()?;
        if self.repositories.contains(&config.name) {
            return Err(Error::AlreadyExists {
                what: format!("repository {}", config.name),
            });
        }
        let adapter = self.factory.build(&config)?;
        adapter.validate().await?;
        self.repositories.insert(Arc::clone(&adapter))?;
        tracing::info!(repository = %config.name, kind = %config.spec.kind, "registered repository");
        Ok(adapter.config().clone())
    }

    pub fn get_repository(&self, caller: &Caller, name: &str) -> Result<RepositoryConfig> {
        authorize(self.access.as_ref(), caller, Operation::ReadFile, name)?;
        Ok(self.repositories.get(name)?.config().clone())
    }

    /// Repositories the caller may read, by name.
    pub fn list_repositories(&self, caller: &Caller) -> Vec<RepositoryConfig> {
        self.repositories
            .configs()
            .into_iter()
            .filter(|config| self.access.allows(caller, Operation::ReadFile, &config.name))
            .collect()
    }

    /// Unregister a repository and remove every resource it owned.
    ///
    /// Queued jobs of the repository fail without running. A job already
    /// working is allowed to finish before the cleanup starts. Files in the
    /// repository are left alone.
    pub async fn delete_repository(&self, caller: &Caller, name: &str) -> Result<JobProgress> {
        authorize(self.access.as_ref(), caller, Operation::ManageRepository, name)?;
        self.repositories.remove(name)?;
        let failed = self.controller.fail_queued(name)?;
        let _lock = self.controller.store().acquire(name).await;
        let plan = self.planner.cleanup(name).await?;
        tracing::info!(repository = %name, deletes = plan.len(), failed_jobs = failed, "removing repository");

        let mut progress = JobProgress::default();
        self.applier.apply(plan, &mut progress).await?;
        Ok(progress)
    }

    pub fn submit_job(&self, caller: &Caller, repository: &str, spec: JobSpec) -> Result<Job> {
        self.controller.submit(caller, repository, spec)
    }

    pub fn job(&self, caller: &Caller, id: Uuid) -> Result<Job> {
        let job = self.controller.get(id)?;
        authorize(self.access.as_ref(), caller, Operation::ReadJob, job.repository())?;
        Ok(job)
    }

    pub fn jobs(&self, caller: &Caller, repository: &str) -> Result<Vec<Job>> {
        authorize(self.access.as_ref(), caller, Operation::ReadJob, repository)?;
        Ok(self.controller.list(Some(repository)))
    }

    /// Start the configured number of job workers.
    pub fn start_workers(&self) -> WorkerPool {
        self.controller.spawn_workers(self.config.workers)
    }

    /// Drop finished jobs older than the retention window.
    pub fn prune_jobs(&self) -> Result<usize> {
        self.controller.prune(self.config.job_retention())
    }
}
