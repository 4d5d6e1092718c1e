//! Caller-side waiting for job completion

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use uuid::Uuid;

use super::controller::JobController;
use super::types::Job;
use crate::config::PollSettings;
use crate::{Error, Result};

/// Read job `id` with exponential backoff until it is terminal.
///
/// # Errors
///
/// `Error::PollTimeout` when `timeout` passes first, `NotFound` at once
/// when the job does not exist.
pub async fn poll_until_terminal(
    controller: &JobController,
    id: Uuid,
    timeout: Duration,
    settings: PollSettings,
) -> Result<Job> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(settings.initial_interval_ms))
        .with_max_interval(Duration::from_millis(settings.max_interval_ms))
        .with_max_elapsed_time(Some(timeout))
        .build();

    backoff::future::retry(policy, move || async move {
        let job = controller.get(id).map_err(backoff::Error::permanent)?;
        if job.state().is_terminal() {
            Ok(job)
        } else {
            tracing::trace!(job = %id, state = %job.state(), "job not finished yet");
            Err(backoff::Error::transient(Error::PollTimeout { id }))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, Caller};
    use crate::apply::Applier;
    use crate::export::Exporter;
    use crate::jobs::{JobRunner, JobSpec, JobStore, PullOptions};
    use crate::planner::Planner;
    use crate::registry::RepositoryRegistry;
    use gitsync_repository::{
        LocalConfig, LocalRepository, RepositoryConfig, RepositorySpec, RepositoryType, SyncPolicy,
    };
    use gitsync_resources::{Converter, MemoryStore, ResourceStore};
    use gitsync_test_utils::TestDir;
    use std::sync::Arc;

    fn controller(dir: &TestDir) -> JobController {
        let repositories = Arc::new(RepositoryRegistry::new());
        let config = RepositoryConfig::new(
            "poll-repo",
            RepositorySpec {
                title: "Poll".into(),
                description: None,
                kind: RepositoryType::Local,
                read_only: false,
                local: Some(LocalConfig {
                    path: dir.root().to_path_buf(),
                }),
                git: None,
                github: None,
                gitlab: None,
                bitbucket: None,
                sync: SyncPolicy {
                    enabled: true,
                    ..SyncPolicy::default()
                },
            },
        );
        repositories
            .insert(Arc::new(LocalRepository::new(config).unwrap()))
            .unwrap();
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::default());
        let runner = JobRunner::new(
            repositories.clone(),
            Planner::new(store.clone(), Converter::default()),
            Applier::new(store.clone(), 1),
            Exporter::new(store, Converter::default()),
        );
        JobController::new(Arc::new(JobStore::in_memory()), repositories, Arc::new(AllowAll), runner)
    }

    #[tokio::test]
    async fn unknown_jobs_fail_immediately() {
        let dir = TestDir::new();
        let err = poll_until_terminal(
            &controller(&dir),
            Uuid::new_v4(),
            Duration::from_secs(30),
            PollSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn queued_jobs_time_out_without_workers() {
        let dir = TestDir::new();
        let jobs = controller(&dir);
        let job = jobs
            .submit(&Caller::admin("a"), "poll-repo", JobSpec::pull(PullOptions::default()))
            .unwrap();

        let err = poll_until_terminal(&jobs, job.id(), Duration::from_millis(200), PollSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { .. }));
    }
}
