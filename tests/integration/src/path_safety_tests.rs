//! Unsafe request paths are rejected before any adapter is called
//!
//! The adapter here counts every call it receives; a rejected request must
//! leave the count at zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use gitsync_core::jobs::DeleteOptions;
use gitsync_core::{
    AllowAll, Caller, ErrorClass, FileService, JobSpec, JobStore, RepositoryRegistry,
};
use gitsync_fs::RelativePath;
use gitsync_repository::{
    FileInfo, LocalConfig, LocalRepository, Ref, Repository, RepositoryConfig, RepositorySpec,
    RepositoryType, SyncPolicy, TreeListing, WriteMode,
};
use gitsync_resources::{Converter, MemoryStore};
use gitsync_test_utils::TestDir;
use pretty_assertions::assert_eq;

const REPO: &str = "guarded";

/// Delegates to a local repository and counts calls.
struct CountingRepository {
    inner: LocalRepository,
    calls: Arc<AtomicUsize>,
}

impl CountingRepository {
    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for CountingRepository {
    fn config(&self) -> &RepositoryConfig {
        self.inner.config()
    }

    fn versioned(&self) -> bool {
        self.inner.versioned()
    }

    async fn read(
        &self,
        path: &RelativePath,
        git_ref: Option<&str>,
    ) -> gitsync_repository::Result<FileInfo> {
        self.touch();
        self.inner.read(path, git_ref).await
    }

    async fn write(
        &self,
        path: &RelativePath,
        data: Vec<u8>,
        mode: WriteMode,
        git_ref: Option<&str>,
        message: &str,
    ) -> gitsync_repository::Result<()> {
        self.touch();
        self.inner.write(path, data, mode, git_ref, message).await
    }

    async fn delete(
        &self,
        path: &RelativePath,
        git_ref: Option<&str>,
        message: &str,
    ) -> gitsync_repository::Result<()> {
        self.touch();
        self.inner.delete(path, git_ref, message).await
    }

    async fn list_tree(
        &self,
        path: &RelativePath,
        git_ref: Option<&str>,
    ) -> gitsync_repository::Result<TreeListing> {
        self.touch();
        self.inner.list_tree(path, git_ref).await
    }

    async fn list_refs(&self) -> gitsync_repository::Result<Vec<Ref>> {
        self.touch();
        self.inner.list_refs().await
    }

    async fn validate(&self) -> gitsync_repository::Result<()> {
        self.touch();
        self.inner.validate().await
    }
}

fn guarded(dir: &TestDir) -> (Arc<AtomicUsize>, Arc<RepositoryRegistry>) {
    let config = RepositoryConfig::new(
        REPO,
        RepositorySpec {
            title: "Guarded".into(),
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
            sync: SyncPolicy::default(),
        },
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(RepositoryRegistry::new());
    registry
        .insert(Arc::new(CountingRepository {
            inner: LocalRepository::new(config).unwrap(),
            calls: Arc::clone(&calls),
        }))
        .unwrap();
    (calls, registry)
}

const UNSAFE: [&str; 6] = [
    "../escape.json",
    "nested/../../escape.json",
    "a/./b.json",
    "a//b.json",
    "..",
    "dir\\..\\escape.json",
];

#[tokio::test]
async fn test_file_requests_reject_unsafe_paths() {
    let dir = TestDir::new();
    let (calls, registry) = guarded(&dir);
    let files = FileService::new(
        registry,
        Arc::new(JobStore::in_memory()),
        Arc::new(AllowAll),
        Arc::new(MemoryStore::default()),
        Converter::default(),
    );
    let caller = Caller::admin("admin");
    let body = br#"{"apiVersion":"dashboard.grafana.app/v1beta1","kind":"Dashboard","metadata":{"name":"x"},"spec":{"title":"X"}}"#;

    for path in UNSAFE {
        let err = files.read(&caller, REPO, path, None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input, "read {path}");
        let err = files
            .write(&caller, REPO, path, body, WriteMode::Upsert, None, "write")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input, "write {path}");
        let err = files.delete(&caller, REPO, path, None, "delete").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input, "delete {path}");
        let err = files.list(&caller, REPO, path, None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input, "list {path}");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // A safe path does reach the adapter.
    files.list(&caller, REPO, "/", None).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_delete_jobs_reject_unsafe_paths() {
    for path in UNSAFE {
        let spec = JobSpec::delete(DeleteOptions {
            paths: vec!["ok.json".into(), path.into()],
            git_ref: None,
        });
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field(), Some("spec.delete.paths[1]"), "{path}");
    }
}
