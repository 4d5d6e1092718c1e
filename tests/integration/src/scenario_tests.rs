//! End-to-end scenarios for a local repository bound to an in-memory store
//!
//! Each test drives the engine the way a client would: register a
//! repository, write files, submit jobs and read the results back.

use std::collections::BTreeMap;
use std::sync::Arc;

use gitsync_core::jobs::{PullOptions, PushOptions};
use gitsync_core::{
    COMPLETED_WITH_ERRORS, Caller, Engine, EngineConfig, Error, ErrorClass, Job, JobProgress,
    JobSpec, JobState, PlanOptions, Planner,
};
use gitsync_repository::{
    LocalConfig, LocalRepository, RepositoryConfig, RepositorySpec, RepositoryType, SyncPolicy,
    WriteMode,
};
use gitsync_resources::provenance::{self, ManagerKind};
use gitsync_resources::{
    Converter, GroupKind, MutationOptions, Provenance, ResourceKey, ResourceStore,
};
use gitsync_test_utils::{TestDir, fixtures};
use pretty_assertions::assert_eq;

const REPO: &str = "scenario";

struct Scenario {
    dir: TestDir,
    engine: Engine,
    admin: Caller,
}

impl Scenario {
    async fn new() -> Self {
        let dir = TestDir::new();
        let engine = Engine::builder(EngineConfig::default()).build().unwrap();
        let admin = Caller::admin("admin");
        engine.create_repository(&admin, config(&dir)).await.unwrap();
        Self { dir, engine, admin }
    }

    async fn run(&self, spec: JobSpec) -> Job {
        let job = self.engine.submit_job(&self.admin, REPO, spec).unwrap();
        assert_eq!(job.state(), JobState::Queued);
        assert!(self.engine.controller().run_next().await.unwrap());
        self.engine.job(&self.admin, job.id()).unwrap()
    }

    async fn pull(&self) -> Job {
        self.run(JobSpec::pull(PullOptions::default())).await
    }

    async fn dashboards(&self) -> Vec<gitsync_resources::ResourceObject> {
        self.engine.store().list(&dashboard_kind()).await.unwrap()
    }
}

fn config(dir: &TestDir) -> RepositoryConfig {
    RepositoryConfig::new(
        REPO,
        RepositorySpec {
            title: "Scenario".into(),
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

fn dashboard_kind() -> GroupKind {
    GroupKind::new("dashboard.grafana.app", "Dashboard")
}

fn counts(progress: &JobProgress) -> (usize, usize, usize) {
    (progress.created, progress.updated, progress.deleted)
}

#[tokio::test]
async fn test_all_panels_pull_delete_and_repull() {
    let scenario = Scenario::new().await;
    scenario.dir.copy_fixture("all-panels.json", "all-panels.json");

    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());
    let dashboards = scenario.dashboards().await;
    assert_eq!(dashboards.len(), 1);
    let dashboard = &dashboards[0];
    assert_eq!(dashboard.name(), fixtures::ALL_PANELS_UID);

    let owner = Provenance::of(&dashboard.metadata).unwrap();
    assert_eq!(owner.manager_kind, ManagerKind::Repo);
    assert_eq!(owner.manager_id, REPO);
    assert_eq!(
        dashboard.metadata.annotation(provenance::SOURCE_PATH),
        Some("all-panels.json")
    );

    // Nobody but the repository may remove what it owns.
    let key = ResourceKey {
        group_kind: dashboard_kind(),
        name: fixtures::ALL_PANELS_UID.into(),
    };
    let err = scenario
        .engine
        .store()
        .delete(&key, &MutationOptions::user("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, gitsync_resources::Error::Forbidden { .. }));
    assert_eq!(scenario.dashboards().await.len(), 1);

    scenario.dir.remove("all-panels.json");
    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success);
    assert_eq!(counts(&job.status().progress), (0, 0, 1));
    assert!(scenario.dashboards().await.is_empty());
}

#[tokio::test]
async fn test_missing_name_then_generate_name() {
    let scenario = Scenario::new().await;
    let files = scenario.engine.files();

    let anonymous = br#"{"apiVersion":"dashboard.grafana.app/v1beta1","kind":"Dashboard","metadata":{},"spec":{"title":"Anonymous"}}"#;
    let err = files
        .write(&scenario.admin, REPO, "anonymous.json", anonymous, WriteMode::Create, None, "add")
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Input);
    assert_eq!(err.field(), Some("metadata.name"));
    assert!(scenario.dashboards().await.is_empty());
    assert!(scenario.engine.controller().list(None).is_empty());
    scenario.dir.assert_not_exists("anonymous.json");

    let generated = br#"{"apiVersion":"dashboard.grafana.app/v1beta1","kind":"Dashboard","metadata":{"generateName":"prefix-"},"spec":{"title":"Generated"}}"#;
    let wrapper = files
        .write(&scenario.admin, REPO, "generated.json", generated, WriteMode::Create, None, "add")
        .await
        .unwrap();
    let stored = wrapper.upsert.unwrap();
    assert!(stored.name().starts_with("prefix-"), "{}", stored.name());
    assert_eq!(scenario.dashboards().await.len(), 1);

    // The generated name is written back, so a pull keeps it.
    let job = scenario.pull().await;
    assert_eq!(counts(&job.status().progress), (0, 0, 0));
    assert_eq!(scenario.dashboards().await[0].name(), stored.name());
}

#[tokio::test]
async fn test_export_keeps_every_schema_version() {
    let scenario = Scenario::new().await;
    let converter = Converter::default();
    let mut expected = BTreeMap::new();
    for fixture in [
        "dashboard-test-v0.yaml",
        "dashboard-test-v1.yaml",
        "dashboard-test-v2alpha1.yaml",
        "dashboard-test-v2alpha2.yaml",
    ] {
        let object = converter.decode(&fixtures::load(fixture), None).unwrap().object;
        expected.insert(
            object.name().to_string(),
            (object.api_version.clone(), object.title().unwrap().to_string()),
        );
        scenario
            .engine
            .store()
            .create(object, &MutationOptions::user("admin"))
            .await
            .unwrap();
    }

    let job = scenario.run(JobSpec::push(PushOptions::default())).await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());
    assert_eq!(job.status().progress.written, 4);

    let mut exported = BTreeMap::new();
    for entry in std::fs::read_dir(scenario.dir.root()).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        let file: serde_json::Value = serde_json::from_str(&scenario.dir.read(&name)).unwrap();
        assert!(file.get("status").is_none(), "{name} kept its status");
        exported.insert(
            file["metadata"]["name"].as_str().unwrap().to_string(),
            (
                file["apiVersion"].as_str().unwrap().to_string(),
                file["spec"]["title"].as_str().unwrap().to_string(),
            ),
        );
    }
    assert_eq!(exported, expected);
}

#[tokio::test]
async fn test_pull_twice_plans_nothing() {
    let scenario = Scenario::new().await;
    scenario.dir.copy_fixture("all-panels.json", "all-panels.json");
    scenario.dir.copy_fixture("text-options.json", "team/text-options.json");
    scenario.dir.copy_fixture("timeline-demo.json", "team/ops/timeline-demo.json");
    scenario.dir.write("notes.txt", "not a manifest");

    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success, "{:?}", job.status());
    assert_eq!(job.status().progress.skipped, 1);

    let planner = Planner::new(Arc::clone(scenario.engine.store()), Converter::default());
    let repo = LocalRepository::new(config(&scenario.dir)).unwrap();
    let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
    assert!(plan.is_empty(), "{plan:?}");
    // Three dashboards and two folders.
    assert_eq!(plan.unchanged, 5);

    let job = scenario.pull().await;
    assert_eq!(counts(&job.status().progress), (0, 0, 0));
}

#[tokio::test]
async fn test_removed_directory_takes_its_resources() {
    let scenario = Scenario::new().await;
    let dashboard = |name: &str| fixtures::to_bytes(&fixtures::dashboard("v1beta1", name, name));
    scenario.dir.write("a/x.json", dashboard("x"));
    scenario.dir.write("a/b/y.json", dashboard("y"));
    scenario.dir.write("c.json", dashboard("c"));
    scenario.pull().await;
    let folders = GroupKind::new("folder.grafana.app", "Folder");
    assert_eq!(scenario.engine.store().list(&folders).await.unwrap().len(), 2);

    scenario.dir.remove("a");
    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success);
    // Two dashboards and the folders for `a/` and `a/b/`.
    assert_eq!(job.status().progress.deleted, 4);

    let remaining: Vec<String> = scenario
        .dashboards()
        .await
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    assert_eq!(remaining, vec!["c".to_string()]);
    assert!(scenario.engine.store().list(&folders).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_jobs_never_change() {
    let scenario = Scenario::new().await;
    scenario.dir.copy_fixture("all-panels.json", "all-panels.json");
    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success);

    let store = scenario.engine.controller().store();
    for state in [JobState::Error, JobState::Success, JobState::Working] {
        let err = store
            .finish(job.id(), state, Some("late".into()), JobProgress::default(), chrono::Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::JobImmutable { .. }), "{err}");
    }
    let reread = scenario.engine.job(&scenario.admin, job.id()).unwrap();
    assert_eq!(reread, job);
    assert_eq!(reread.spec(), &JobSpec::pull(PullOptions::default()));
}

#[tokio::test]
async fn test_invalid_schema_ends_job_in_error() {
    let scenario = Scenario::new().await;
    scenario.dir.copy_fixture("all-panels.json", "all-panels.json");
    scenario
        .dir
        .copy_fixture("invalid-dashboard-schema.json", "invalid-dashboard-schema.json");

    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Error);
    assert_eq!(job.status().message.as_deref(), Some(COMPLETED_WITH_ERRORS));
    let errors = &job.status().progress.errors;
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].starts_with("Dashboard.dashboard.grafana.app \"invalid-schema-uid\" is invalid: [spec.title"),
        "{}",
        errors[0]
    );
    // Earlier successes stay applied.
    assert_eq!(job.status().progress.created, 1);
    assert_eq!(scenario.dashboards().await.len(), 1);
}

#[tokio::test]
async fn test_corrupted_file_keeps_its_dashboard() {
    let scenario = Scenario::new().await;
    scenario.dir.copy_fixture("all-panels.json", "all-panels.json");
    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Success);

    scenario.dir.write("all-panels.json", "{ not json");
    let job = scenario.pull().await;
    assert_eq!(job.state(), JobState::Error);
    assert_eq!(job.status().message.as_deref(), Some(COMPLETED_WITH_ERRORS));
    assert_eq!(job.status().progress.deleted, 0);
    assert!(job.status().progress.errors[0].starts_with("all-panels.json: "));
    let dashboards = scenario.dashboards().await;
    assert_eq!(dashboards.len(), 1);
    assert_eq!(dashboards[0].name(), fixtures::ALL_PANELS_UID);
}
