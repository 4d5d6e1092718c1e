//! Job submission, execution and the worker pool
//!
//! Submission only records a job. Workers claim queued jobs one repository
//! at a time and run them to a terminal state; callers find out by reading
//! the record again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gitsync_fs::{RequestPath, RootPolicy};
use gitsync_repository::Repository;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::store::JobStore;
use super::types::{Job, JobAction, JobProgress, JobSpec, JobState, PushOptions};
use crate::access::{AccessControl, Caller, Operation, authorize};
use crate::apply::Applier;
use crate::export::Exporter;
use crate::files::delete_path;
use crate::planner::{PlanOptions, Planner};
use crate::registry::RepositoryRegistry;
use crate::{Error, Result};

/// Message of a job that finished with item failures.
pub const COMPLETED_WITH_ERRORS: &str = "completed with errors";

/// How long an idle worker sleeps before checking the queue unprompted.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// Executes a claimed job against its repository.
#[derive(Clone)]
pub struct JobRunner {
    repositories: Arc<RepositoryRegistry>,
    planner: Planner,
    applier: Applier,
    exporter: Exporter,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner").finish_non_exhaustive()
    }
}

/// Terminal state, message and progress of a finished run.
type Outcome = (JobState, Option<String>, JobProgress);

impl JobRunner {
    pub fn new(
        repositories: Arc<RepositoryRegistry>,
        planner: Planner,
        applier: Applier,
        exporter: Exporter,
    ) -> Self {
        Self {
            repositories,
            planner,
            applier,
            exporter,
        }
    }

    /// Run `job` and decide how it ends.
    ///
    /// Item failures are collected and end the job in `Error` once every
    /// item has been tried. Anything that stops the run early is fatal and
    /// becomes the job message.
    pub async fn run(&self, job: &Job) -> Outcome {
        let mut progress = JobProgress::default();
        match self.execute(job, &mut progress).await {
            Err(err) => {
                tracing::warn!(job = %job.id(), repository = %job.repository(), error = %err, "job failed");
                let message = err.to_string();
                progress.error(message.clone());
                (JobState::Error, Some(message), progress)
            }
            Ok(()) if progress.has_errors() => (
                JobState::Error,
                Some(COMPLETED_WITH_ERRORS.to_string()),
                progress,
            ),
            Ok(()) => (JobState::Success, None, progress),
        }
    }

    async fn execute(&self, job: &Job, progress: &mut JobProgress) -> Result<()> {
        let repo = self.repositories.get(job.repository())?;
        let spec = job.spec();
        match spec.action() {
            JobAction::Pull => {
                let options = PlanOptions {
                    git_ref: spec.pull_options().git_ref,
                    adopt_unmanaged: false,
                };
                self.pull(repo.as_ref(), &options, progress).await
            }
            JobAction::Push => {
                self.exporter
                    .export(repo.as_ref(), &spec.push_options(), progress)
                    .await
            }
            JobAction::Delete => self.delete(repo.as_ref(), spec, progress).await,
            JobAction::Migrate => {
                let push = PushOptions {
                    message: spec.migrate_options().message,
                    ..PushOptions::default()
                };
                self.exporter.export(repo.as_ref(), &push, progress).await?;
                if progress.has_errors() {
                    // Pulling now would adopt a partial export.
                    return Ok(());
                }
                let options = PlanOptions {
                    git_ref: None,
                    adopt_unmanaged: true,
                };
                self.pull(repo.as_ref(), &options, progress).await
            }
        }
    }

    async fn pull(
        &self,
        repo: &dyn Repository,
        options: &PlanOptions,
        progress: &mut JobProgress,
    ) -> Result<()> {
        let plan = self.planner.plan(repo, options).await?;
        tracing::debug!(
            repository = %plan.repository,
            items = plan.len(),
            unchanged = plan.unchanged,
            "planned pull"
        );
        self.applier.apply(plan, progress).await
    }

    async fn delete(&self, repo: &dyn Repository, spec: &JobSpec, progress: &mut JobProgress) -> Result<()> {
        let options = spec.delete_options();
        let message = format!("Delete {}", options.paths.join(", "));
        for raw in &options.paths {
            let path = match RequestPath::parse(raw).and_then(|r| gitsync_fs::validate(&r, RootPolicy::Allow)) {
                Ok(path) => path,
                Err(err) => {
                    progress.error(format!("{raw}: {err}"));
                    continue;
                }
            };
            match delete_path(&self.planner, repo, &path, options.git_ref.as_deref(), &message).await {
                Ok(removed) => {
                    progress.written += 1;
                    progress.deleted += removed;
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "cannot delete path");
                    progress.error(format!("{path}: {err}"));
                }
            }
        }
        Ok(())
    }
}

struct Inner {
    store: Arc<JobStore>,
    repositories: Arc<RepositoryRegistry>,
    access: Arc<dyn AccessControl>,
    runner: JobRunner,
}

/// Accepts jobs and drives them through their lifecycle.
#[derive(Clone)]
pub struct JobController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl JobController {
    pub fn new(
        store: Arc<JobStore>,
        repositories: Arc<RepositoryRegistry>,
        access: Arc<dyn AccessControl>,
        runner: JobRunner,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                repositories,
                access,
                runner,
            }),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.inner.store
    }

    /// Queue a job for `repository`.
    ///
    /// # Errors
    ///
    /// `Forbidden` when the caller may not create jobs, `Input` for a
    /// malformed spec or a pull on a repository with sync disabled, and
    /// `NotFound` for an unknown repository. Nothing is
    /// recorded in any of these cases.
    pub fn submit(&self, caller: &Caller, repository: &str, spec: JobSpec) -> Result<Job> {
        authorize(self.inner.access.as_ref(), caller, Operation::CreateJob, repository)?;
        spec.validate()?;
        let repo = self.inner.repositories.get(repository)?;
        if matches!(spec.action(), JobAction::Pull | JobAction::Migrate) && !repo.config().spec.sync.enabled {
            return Err(Error::input(
                "spec.sync.enabled",
                format!("sync is disabled for repository {repository}"),
            ));
        }

        let job = Job::new(repository, spec, Utc::now());
        self.inner.store.insert(job.clone())?;
        tracing::info!(job = %job.id(), repository = %repository, action = %job.action(), "job queued");
        Ok(job)
    }

    pub fn get(&self, id: Uuid) -> Result<Job> {
        self.inner.store.get(id)
    }

    pub fn list(&self, repository: Option<&str>) -> Vec<Job> {
        self.inner.store.list(repository)
    }

    /// Claim and run one job. Returns `false` when nothing could be claimed.
    ///
    /// Record writes run on the blocking pool.
    pub async fn run_next(&self) -> Result<bool> {
        let store = Arc::clone(&self.inner.store);
        let Some((job, lock)) = tokio::task::spawn_blocking(move || store.claim_next(Utc::now())).await?? else {
            return Ok(false);
        };

        let runner = self.inner.runner.clone();
        let claimed = job.clone();
        let (state, message, progress) = match tokio::spawn(async move { runner.run(&claimed).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = format!("job task failed: {err}");
                let mut progress = JobProgress::default();
                progress.error(message.clone());
                (JobState::Error, Some(message), progress)
            }
        };
        let store = Arc::clone(&self.inner.store);
        let id = job.id();
        let finished =
            tokio::task::spawn_blocking(move || store.finish(id, state, message, progress, Utc::now())).await;
        drop(lock);
        finished??;
        Ok(true)
    }

    /// Start `count` workers that run queued jobs until shut down.
    pub fn spawn_workers(&self, count: usize) -> WorkerPool {
        let (shutdown, receiver) = watch::channel(false);
        let handles = (0..count)
            .map(|index| tokio::spawn(worker_loop(self.clone(), index, receiver.clone())))
            .collect();
        tracing::info!(workers = count, "started job workers");
        WorkerPool { shutdown, handles }
    }

    /// Fail queued jobs of a repository that is going away.
    pub fn fail_queued(&self, repository: &str) -> Result<usize> {
        self.inner
            .store
            .fail_queued(repository, "repository removed", Utc::now())
    }

    /// Drop terminal jobs older than `retention`.
    pub fn prune(&self, retention: chrono::Duration) -> Result<usize> {
        self.inner.store.prune(Utc::now(), retention)
    }
}

async fn worker_loop(controller: JobController, index: usize, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(worker = index, "worker started");
    let store = Arc::clone(controller.store());
    loop {
        if *shutdown.borrow() {
            break;
        }
        let notified = store.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match controller.run_next().await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => tracing::error!(worker = index, error = %err, "cannot record job outcome"),
        }

        tokio::select! {
            _ = &mut notified => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(IDLE_POLL) => {}
        }
    }
    tracing::debug!(worker = index, "worker stopped");
}

/// Handles of running workers.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every worker once its current job is finished.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker panicked");
            }
        }
        tracing::info!("job workers stopped");
    }
}
