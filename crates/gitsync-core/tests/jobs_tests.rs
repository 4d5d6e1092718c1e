//! Job persistence, recovery and scheduling through the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gitsync_core::{
    Caller, Engine, EngineConfig, Error, JobSpec, JobState, JobStore, PollSettings,
    poll_until_terminal,
};
use gitsync_core::jobs::PullOptions;
use gitsync_repository::{
    LocalConfig, RepositoryConfig, RepositorySpec, RepositoryType, SyncPolicy,
};
use gitsync_resources::GroupKind;
use gitsync_test_utils::TestDir;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn local(name: &str, dir: &TestDir) -> RepositoryConfig {
    RepositoryConfig::new(
        name,
        RepositorySpec {
            title: name.into(),
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
    )
}

fn pull() -> JobSpec {
    JobSpec::pull(PullOptions::default())
}

async fn engine_with_jobs_dir(jobs: &TempDir, repo: &TestDir) -> Engine {
    let config = EngineConfig {
        jobs_dir: Some(jobs.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let engine = Engine::builder(config).build().unwrap();
    engine
        .create_repository(&Caller::admin("admin"), local("persisted", repo))
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn records_are_written_as_json_files() {
    let jobs = TempDir::new().unwrap();
    let repo = TestDir::new();
    let engine = engine_with_jobs_dir(&jobs, &repo).await;

    let job = engine.submit_job(&Caller::admin("admin"), "persisted", pull()).unwrap();
    let record = jobs.path().join(format!("{}.json", job.id()));
    assert!(record.is_file());
    let body: serde_json::Value = serde_json::from_slice(&std::fs::read(record).unwrap()).unwrap();
    assert_eq!(body["spec"]["action"], "pull");
    assert_eq!(body["status"]["state"], "queued");
}

#[tokio::test]
async fn reopening_requeues_and_fails_interrupted_jobs() {
    let jobs = TempDir::new().unwrap();
    let repo = TestDir::new();
    let engine = engine_with_jobs_dir(&jobs, &repo).await;
    let admin = Caller::admin("admin");

    let interrupted = engine.submit_job(&admin, "persisted", pull()).unwrap();
    let waiting = engine.submit_job(&admin, "persisted", pull()).unwrap();
    let (claimed, lock) = engine.controller().store().claim_next(Utc::now()).unwrap().unwrap();
    assert_eq!(claimed.id(), interrupted.id());
    // The process "dies" with the job still working.
    drop(lock);
    drop(engine);

    let reopened = Arc::new(JobStore::open(Some(jobs.path())).unwrap());
    let failed = reopened.get(interrupted.id()).unwrap();
    assert_eq!(failed.state(), JobState::Error);
    assert_eq!(failed.status().message.as_deref(), Some("interrupted before completion"));

    let (next, _lock) = reopened.claim_next(Utc::now()).unwrap().unwrap();
    assert_eq!(next.id(), waiting.id());
}

#[tokio::test]
async fn finished_jobs_survive_restart_unchanged() {
    let jobs = TempDir::new().unwrap();
    let repo = TestDir::new();
    repo.copy_fixture("all-panels.json", "all-panels.json");
    let engine = engine_with_jobs_dir(&jobs, &repo).await;
    let job = engine.submit_job(&Caller::admin("admin"), "persisted", pull()).unwrap();
    assert!(engine.controller().run_next().await.unwrap());
    let done = engine.job(&Caller::admin("admin"), job.id()).unwrap();
    assert_eq!(done.state(), JobState::Success);
    drop(engine);

    let reopened = JobStore::open(Some(jobs.path())).unwrap();
    assert_eq!(reopened.get(job.id()).unwrap(), done);
    let err = reopened
        .finish(job.id(), JobState::Error, None, Default::default(), Utc::now())
        .unwrap_err();
    assert!(matches!(err, Error::JobImmutable { .. }));
}

#[tokio::test]
async fn one_job_per_repository_at_a_time() {
    let first_repo = TestDir::new();
    let second_repo = TestDir::new();
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    let admin = Caller::admin("admin");
    engine.create_repository(&admin, local("first", &first_repo)).await.unwrap();
    engine.create_repository(&admin, local("second", &second_repo)).await.unwrap();

    let a1 = engine.submit_job(&admin, "first", pull()).unwrap();
    let a2 = engine.submit_job(&admin, "first", pull()).unwrap();
    let b1 = engine.submit_job(&admin, "second", pull()).unwrap();

    let store = engine.controller().store();
    let (claimed_a, lock_a) = store.claim_next(Utc::now()).unwrap().unwrap();
    let (claimed_b, _lock_b) = store.claim_next(Utc::now()).unwrap().unwrap();
    assert_eq!(claimed_a.id(), a1.id());
    assert_eq!(claimed_b.id(), b1.id());
    // The second job of `first` waits for the lock.
    assert!(store.claim_next(Utc::now()).unwrap().is_none());
    assert_eq!(store.get(a2.id()).unwrap().state(), JobState::Queued);

    drop(lock_a);
    let (claimed, _lock) = store.claim_next(Utc::now()).unwrap().unwrap();
    assert_eq!(claimed.id(), a2.id());
}

#[tokio::test]
async fn workers_finish_jobs_for_many_repositories() {
    let repos: Vec<TestDir> = (0..3).map(|_| TestDir::new()).collect();
    let engine = Engine::builder(EngineConfig {
        workers: 2,
        ..EngineConfig::default()
    })
    .build()
    .unwrap();
    let admin = Caller::admin("admin");
    let mut ids = Vec::new();
    for (index, dir) in repos.iter().enumerate() {
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let name = format!("repo-{index}");
        engine.create_repository(&admin, local(&name, dir)).await.unwrap();
        ids.push(engine.submit_job(&admin, &name, pull()).unwrap().id());
    }

    let pool = engine.start_workers();
    for id in ids {
        let job = poll_until_terminal(
            engine.controller(),
            id,
            Duration::from_secs(10),
            PollSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(job.state(), JobState::Success);
    }
    pool.shutdown().await;
}

#[tokio::test]
async fn removing_a_repository_fails_its_queued_jobs() {
    let repo = TestDir::new();
    repo.copy_fixture("all-panels.json", "all-panels.json");
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    let admin = Caller::admin("admin");
    engine.create_repository(&admin, local("doomed", &repo)).await.unwrap();
    engine.submit_job(&admin, "doomed", pull()).unwrap();
    engine.controller().run_next().await.unwrap();
    let queued = engine.submit_job(&admin, "doomed", pull()).unwrap();

    let progress = engine.delete_repository(&admin, "doomed").await.unwrap();
    assert_eq!(progress.deleted, 1);
    assert!(engine.store().list(&GroupKind::new("dashboard.grafana.app", "Dashboard")).await.unwrap().is_empty());

    let failed = engine.job(&admin, queued.id()).unwrap();
    assert_eq!(failed.state(), JobState::Error);
    assert_eq!(failed.status().message.as_deref(), Some("repository removed"));
    // Files stay where they are.
    repo.assert_exists("all-panels.json");
}
