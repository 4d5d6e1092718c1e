//! Job records, the run queue and per-repository locks
//!
//! Every change is persisted before it becomes visible in memory, so a
//! record read back from disk is never newer than what callers have seen.
//! Changes are serialized by a writer lock; the state lock is only held for
//! in-memory work, so readers never wait on the disk. Persistence is
//! optional; without a directory the store lives and dies with the process.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use gitsync_fs::io::{self, RobustnessConfig};
use gitsync_fs::NormalizedPath;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use uuid::Uuid;

use super::types::{Job, JobProgress, JobState};
use crate::{Error, Result};

const RECORD_EXTENSION: &str = "json";
const INTERRUPTED: &str = "interrupted before completion";

#[derive(Default)]
struct State {
    jobs: BTreeMap<Uuid, Job>,
    /// Queued job ids, oldest first.
    queue: VecDeque<Uuid>,
    /// Repositories with a job in `Working`.
    busy: HashSet<String>,
}

/// Durable job records plus the scheduling state around them.
pub struct JobStore {
    state: Mutex<State>,
    /// Held for the whole of every change, including its disk write.
    writer: Mutex<()>,
    dir: Option<PathBuf>,
    notify: Notify,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Exclusive claim on a repository while one of its jobs is working.
///
/// Dropping the lock frees the repository and wakes idle workers.
#[must_use = "the repository is released as soon as the lock is dropped"]
pub struct RepositoryLock {
    store: Arc<JobStore>,
    repository: String,
}

impl std::fmt::Debug for RepositoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryLock")
            .field("repository", &self.repository)
            .finish()
    }
}

impl RepositoryLock {
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        self.store.lock().busy.remove(&self.repository);
        tracing::debug!(repository = %self.repository, "released repository");
        self.store.notify.notify_waiters();
    }
}

impl JobStore {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(State::default()),
            writer: Mutex::new(()),
            dir: None,
            notify: Notify::new(),
        }
    }

    /// Open a store, recovering records from `dir` when given.
    ///
    /// Queued records go back on the queue in creation order. Records left
    /// `Working` by a previous process are failed, since nothing will ever
    /// finish them.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or read, or a record
    /// cannot be parsed.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::in_memory());
        };
        std::fs::create_dir_all(dir).map_err(|e| gitsync_fs::Error::io(dir, e))?;
        let store = Self {
            state: Mutex::new(State::default()),
            writer: Mutex::new(()),
            dir: Some(dir.to_path_buf()),
            notify: Notify::new(),
        };

        let now = Utc::now();
        let mut queued = Vec::new();
        let mut jobs = BTreeMap::new();
        for mut job in store.load_records(dir)? {
            match job.state() {
                JobState::Queued => queued.push((job.created(), job.id())),
                JobState::Working => {
                    tracing::warn!(job = %job.id(), repository = %job.repository(), "failing interrupted job");
                    let status = job.status_mut();
                    status.state = JobState::Error;
                    status.message = Some(INTERRUPTED.to_string());
                    status.finished = Some(now);
                    status.progress.error(INTERRUPTED);
                    store.persist(&job)?;
                }
                JobState::Success | JobState::Error => {}
            }
            jobs.insert(job.id(), job);
        }
        queued.sort();

        {
            let mut state = store.lock();
            state.jobs = jobs;
            state.queue = queued.into_iter().map(|(_, id)| id).collect();
            tracing::info!(
                jobs = state.jobs.len(),
                queued = state.queue.len(),
                dir = %dir.display(),
                "opened job store"
            );
        }
        Ok(store)
    }

    fn load_records(&self, dir: &Path) -> Result<Vec<Job>> {
        let entries = std::fs::read_dir(dir).map_err(|e| gitsync_fs::Error::io(dir, e))?;
        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| gitsync_fs::Error::io(dir, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.')
                || io::is_lock_sidecar(&name)
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            let text = io::read_text(&NormalizedPath::new(&path))?;
            jobs.push(serde_json::from_str(&text)?);
        }
        Ok(jobs)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_path(&self, id: Uuid) -> Option<NormalizedPath> {
        self.dir
            .as_ref()
            .map(|dir| NormalizedPath::new(dir.join(format!("{id}.{RECORD_EXTENSION}"))))
    }

    fn persist(&self, job: &Job) -> Result<()> {
        let Some(path) = self.record_path(job.id()) else {
            return Ok(());
        };
        let body = serde_json::to_vec_pretty(job)?;
        io::write_atomic(&path, &body, RobustnessConfig::default())?;
        Ok(())
    }

    /// Record a new job and queue it.
    pub fn insert(&self, job: Job) -> Result<()> {
        let _writer = self.writer();
        if self.lock().jobs.contains_key(&job.id()) {
            return Err(Error::AlreadyExists {
                what: format!("job {}", job.id()),
            });
        }
        self.persist(&job)?;
        {
            let mut state = self.lock();
            state.queue.push_back(job.id());
            state.jobs.insert(job.id(), job);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Job> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("job {id}")))
    }

    /// Jobs, oldest first, optionally only those of one repository.
    pub fn list(&self, repository: Option<&str>) -> Vec<Job> {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| repository.is_none_or(|name| job.repository() == name))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created(), job.id()));
        jobs
    }

    pub fn is_busy(&self, repository: &str) -> bool {
        self.lock().busy.contains(repository)
    }

    /// Claim the oldest queued job whose repository is idle.
    ///
    /// The job moves to `Working` and its repository stays locked until the
    /// returned [`RepositoryLock`] is dropped. Jobs behind a busy repository
    /// keep their place in the queue.
    pub fn claim_next(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Option<(Job, RepositoryLock)>> {
        let _writer = self.writer();
        // Reserve the job and its repository before touching the disk, so
        // outside lockers cannot slip in while the record is written.
        let (position, mut claimed) = {
            let mut state = self.lock();
            let position = state.queue.iter().position(|id| {
                state
                    .jobs
                    .get(id)
                    .is_some_and(|job| !state.busy.contains(job.repository()))
            });
            let Some(position) = position else {
                return Ok(None);
            };
            let id = state.queue[position];
            let Some(current) = state.jobs.get(&id).cloned() else {
                state.queue.remove(position);
                return Ok(None);
            };
            state.queue.remove(position);
            state.busy.insert(current.repository().to_string());
            (position, current)
        };
        let id = claimed.id();

        let status = claimed.status_mut();
        status.state = JobState::Working;
        status.started = Some(now);
        if let Err(err) = self.persist(&claimed) {
            let mut state = self.lock();
            state.busy.remove(claimed.repository());
            let position = position.min(state.queue.len());
            state.queue.insert(position, id);
            return Err(err);
        }
        self.lock().jobs.insert(id, claimed.clone());

        tracing::info!(job = %id, repository = %claimed.repository(), action = %claimed.action(), "job working");
        let lock = RepositoryLock {
            store: Arc::clone(self),
            repository: claimed.repository().to_string(),
        };
        Ok(Some((claimed, lock)))
    }

    /// Lock an idle repository for work done outside of a job.
    ///
    /// Returns `None` while one of its jobs is working or another caller
    /// holds the lock. Queued jobs of the repository wait until it is
    /// released.
    pub fn try_acquire(self: &Arc<Self>, repository: &str) -> Option<RepositoryLock> {
        if !self.lock().busy.insert(repository.to_string()) {
            return None;
        }
        tracing::debug!(repository = %repository, "locked repository");
        Some(RepositoryLock {
            store: Arc::clone(self),
            repository: repository.to_string(),
        })
    }

    /// Wait until `repository` is idle, then lock it.
    pub async fn acquire(self: &Arc<Self>, repository: &str) -> RepositoryLock {
        loop {
            let notified = self.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(lock) = self.try_acquire(repository) {
                return lock;
            }
            tracing::debug!(repository = %repository, "waiting for running job");
            notified.await;
        }
    }

    /// Move a job to a terminal state with its final progress.
    ///
    /// # Errors
    ///
    /// `JobImmutable` when the job already finished, `InvalidTransition`
    /// for any other move the state machine forbids.
    pub fn finish(
        &self,
        id: Uuid,
        next: JobState,
        message: Option<String>,
        progress: JobProgress,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let _writer = self.writer();
        let mut finished = self.get(id)?;
        let from = finished.state();
        if from.is_terminal() {
            return Err(Error::JobImmutable { id, state: from });
        }
        if !next.is_terminal() || !from.can_transition_to(next) {
            return Err(Error::InvalidTransition { id, from, to: next });
        }

        let status = finished.status_mut();
        status.state = next;
        status.message = message;
        status.finished = Some(now);
        status.progress = progress;
        self.persist(&finished)?;

        {
            let mut state = self.lock();
            if from == JobState::Queued {
                state.queue.retain(|queued| *queued != id);
            }
            state.jobs.insert(id, finished.clone());
        }

        tracing::info!(
            job = %id,
            repository = %finished.repository(),
            state = %next,
            errors = finished.status().progress.errors.len(),
            "job finished"
        );
        Ok(finished)
    }

    /// Fail every queued job of `repository` without running it.
    pub fn fail_queued(&self, repository: &str, message: &str, now: DateTime<Utc>) -> Result<usize> {
        let ids: Vec<Uuid> = {
            let state = self.lock();
            state
                .queue
                .iter()
                .filter(|id| {
                    state
                        .jobs
                        .get(id)
                        .is_some_and(|job| job.repository() == repository)
                })
                .copied()
                .collect()
        };
        for id in &ids {
            let mut progress = JobProgress::default();
            progress.error(message);
            self.finish(*id, JobState::Error, Some(message.to_string()), progress, now)?;
        }
        Ok(ids.len())
    }

    /// Drop terminal jobs that finished more than `retention` before `now`.
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize> {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return Ok(0);
        };
        let _writer = self.writer();
        let expired: Vec<Uuid> = self
            .lock()
            .jobs
            .values()
            .filter(|job| job.state().is_terminal())
            .filter(|job| job.status().finished.is_some_and(|finished| finished < cutoff))
            .map(Job::id)
            .collect();
        for id in &expired {
            if let Some(path) = self.record_path(*id)
                && path.exists()
            {
                io::remove_file(&path)?;
            }
            self.lock().jobs.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "pruned finished jobs");
        }
        Ok(expired.len())
    }

    /// Future completing at the next queue change or repository release.
    ///
    /// Create it before checking for work so a change in between is not
    /// missed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
