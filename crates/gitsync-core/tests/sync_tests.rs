//! Pull and push jobs against real git repositories.

use std::time::Duration;

use gitsync_core::jobs::{PullOptions, PushOptions};
use gitsync_core::planner::folder_name;
use gitsync_core::{Caller, Engine, EngineConfig, JobSpec, JobState, PollSettings, poll_until_terminal};
use gitsync_fs::RelativePath;
use gitsync_repository::{
    GitConfig, RepositoryConfig, RepositorySpec, RepositoryType, SyncPolicy, SyncTarget,
};
use gitsync_resources::{GroupKind, MutationOptions, Provenance, ResourceKey, ResourceObject, provenance};
use gitsync_test_utils::fixtures;
use gitsync_test_utils::git::{self, BRANCH};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

const REPO: &str = "git-sync";

fn git_config(path: &std::path::Path) -> RepositoryConfig {
    RepositoryConfig::new(
        REPO,
        RepositorySpec {
            title: "Git sync".into(),
            description: None,
            kind: RepositoryType::Git,
            read_only: false,
            local: None,
            git: Some(GitConfig {
                url: path.display().to_string(),
                branch: BRANCH.into(),
                token_ref: None,
            }),
            github: None,
            gitlab: None,
            bitbucket: None,
            sync: SyncPolicy {
                enabled: true,
                target: SyncTarget::Folder,
                path: RelativePath::parse("grafana/").unwrap(),
                interval_secs: 0,
            },
        },
    )
}

fn dashboard_key(name: &str) -> ResourceKey {
    ResourceKey {
        group_kind: GroupKind::new("dashboard.grafana.app", "Dashboard"),
        name: name.into(),
    }
}

async fn run(engine: &Engine, spec: JobSpec) -> gitsync_core::Job {
    let admin = Caller::admin("admin");
    let job = engine.submit_job(&admin, REPO, spec).unwrap();
    assert!(engine.controller().run_next().await.unwrap());
    poll_until_terminal(engine.controller(), job.id(), Duration::from_secs(5), PollSettings::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn pull_builds_folder_tree_under_repository_folder() {
    let dir = TempDir::new().unwrap();
    let top = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "top", "Top"));
    let nested = fixtures::to_bytes(&fixtures::dashboard("v2alpha1", "nested", "Nested"));
    git::bare_repo_with_files(
        dir.path(),
        &[
            ("README.md", b"# not synced".as_slice()),
            ("grafana/top.json", top.as_slice()),
            ("grafana/team/nested.json", nested.as_slice()),
        ],
    );
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    engine
        .create_repository(&Caller::admin("admin"), git_config(dir.path()))
        .await
        .unwrap();

    let job = run(&engine, JobSpec::pull(PullOptions::default())).await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());
    // Repository folder, `team/` folder and two dashboards.
    assert_eq!(job.status().progress.created, 4);

    let store = engine.store();
    let top = store.get(&dashboard_key("top")).await.unwrap();
    assert_eq!(provenance::folder(&top.metadata), Some(REPO));
    assert_eq!(top.metadata.annotation(provenance::SOURCE_PATH), Some("grafana/top.json"));

    let team = folder_name(REPO, &RelativePath::parse("grafana/team/").unwrap());
    let nested = store.get(&dashboard_key("nested")).await.unwrap();
    assert_eq!(provenance::folder(&nested.metadata), Some(team.as_str()));
    assert!(Provenance::is_owned_by(&nested.metadata, REPO));
}

#[tokio::test]
async fn new_commits_update_only_what_changed() {
    let dir = TempDir::new().unwrap();
    let a = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "a", "A"));
    let b = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "b", "B"));
    let raw = git::bare_repo_with_files(dir.path(), &[("grafana/a.json", a.as_slice()), ("grafana/b.json", b.as_slice())]);
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    engine
        .create_repository(&Caller::admin("admin"), git_config(dir.path()))
        .await
        .unwrap();
    run(&engine, JobSpec::pull(PullOptions::default())).await;

    let renamed = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "a", "A renamed"));
    git::commit_files(&raw, &[("grafana/a.json", renamed.as_slice())], "rename a");
    let job = run(&engine, JobSpec::pull(PullOptions::default())).await;
    let progress = &job.status().progress;
    assert_eq!(job.state(), JobState::Success);
    assert_eq!(progress.updated, 1);
    assert_eq!(progress.created, 0);
    // `b` plus the repository folder.
    assert_eq!(progress.unchanged, 2);

    let a = engine.store().get(&dashboard_key("a")).await.unwrap();
    assert_eq!(a.title(), Some("A renamed"));
}

#[tokio::test]
async fn push_commits_unmanaged_resources_to_a_branch() {
    let dir = TempDir::new().unwrap();
    let raw = git::bare_repo_with_files(dir.path(), &[("README.md", b"# export".as_slice())]);
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    engine
        .create_repository(&Caller::admin("admin"), git_config(dir.path()))
        .await
        .unwrap();
    let board = ResourceObject::new("dashboard.grafana.app/v1beta1", "Dashboard", "board")
        .with_spec(json!({ "title": "Exported Board" }));
    engine
        .store()
        .create(board, &MutationOptions::user("alice"))
        .await
        .unwrap();

    let job = run(
        &engine,
        JobSpec::push(PushOptions {
            branch: Some("export".into()),
            ..PushOptions::default()
        }),
    )
    .await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());
    assert_eq!(job.status().progress.written, 1);

    let data = git::read_file(&raw, "export", "grafana/exported-board.json").unwrap();
    let file: serde_json::Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(file["metadata"]["name"], "board");
    assert!(git::read_file(&raw, BRANCH, "grafana/exported-board.json").is_none());
}

#[tokio::test]
async fn migrate_hands_resources_to_the_repository() {
    let dir = TempDir::new().unwrap();
    git::bare_repo_with_files(dir.path(), &[("README.md", b"# migrate".as_slice())]);
    let engine = Engine::builder(EngineConfig::default()).build().unwrap();
    engine
        .create_repository(&Caller::admin("admin"), git_config(dir.path()))
        .await
        .unwrap();
    let board = ResourceObject::new("dashboard.grafana.app/v1beta1", "Dashboard", "legacy")
        .with_spec(json!({ "title": "Legacy" }));
    engine
        .store()
        .create(board, &MutationOptions::user("alice"))
        .await
        .unwrap();

    let job = run(&engine, JobSpec::migrate(Default::default())).await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());

    let legacy = engine.store().get(&dashboard_key("legacy")).await.unwrap();
    assert!(Provenance::is_owned_by(&legacy.metadata, REPO));
    assert_eq!(legacy.metadata.annotation(provenance::SOURCE_PATH), Some("grafana/legacy.json"));

    // A second pull finds nothing to do.
    let job = run(&engine, JobSpec::pull(PullOptions::default())).await;
    let progress = &job.status().progress;
    assert_eq!((progress.created, progress.updated, progress.deleted), (0, 0, 0));
}
