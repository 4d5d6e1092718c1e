//! File operations on a registered repository
//!
//! Reads preview the resource a file would produce. Writes decode and
//! dry-run the body before the file is touched, and when they target the
//! configured branch the store is updated right away, as a pull would.

use std::sync::Arc;

use gitsync_fs::checksum::compute_checksum;
use gitsync_fs::{RelativePath, RequestPath, RootPolicy};
use gitsync_repository::{FileTreeNode, Ref, Repository, WriteMode, tree_node};
use gitsync_resources::provenance::{self, ManagerKind};
use gitsync_resources::{
    ClassicType, Converter, FileFormat, MutationOptions, NameGenerator, Provenance, ResourceObject,
    ResourceStore,
};
use serde::Serialize;

use crate::access::{AccessControl, Caller, Operation, authorize};
use crate::dryrun::DryRunValidator;
use crate::jobs::JobStore;
use crate::planner::{Action, Planner, parent_folder, targets_configured_branch};
use crate::registry::RepositoryRegistry;
use crate::{Error, Result};

/// What a file request saw, and what it did or would do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWrapper {
    pub path: RelativePath,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// Content hash reported by the repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub action: Action,
    /// The object decoded from the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classic: Option<ClassicType>,
    /// The object as the store would accept it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<ResourceObject>,
    /// The object as the store holds it after a write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<ResourceObject>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Validation failures found while previewing a read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ResourceWrapper {
    fn new(path: RelativePath, git_ref: Option<&str>, action: Action) -> Self {
        Self {
            path,
            git_ref: git_ref.map(str::to_string),
            hash: None,
            action,
            file: None,
            classic: None,
            dry_run: None,
            upsert: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// A decoded file with its name settled and provenance stamped.
struct Prepared {
    object: ResourceObject,
    classic: Option<ClassicType>,
    warnings: Vec<String>,
    /// Set when the body had to be re-encoded to carry a generated name.
    rewritten: Option<Vec<u8>>,
}

/// Access-checked file operations over registered repositories.
#[derive(Clone)]
pub struct FileService {
    repositories: Arc<RepositoryRegistry>,
    jobs: Arc<JobStore>,
    access: Arc<dyn AccessControl>,
    store: Arc<dyn ResourceStore>,
    planner: Planner,
    validator: DryRunValidator,
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService")
            .field("repositories", &self.repositories)
            .finish_non_exhaustive()
    }
}

fn parse_file(raw: &str) -> Result<RelativePath> {
    Ok(RelativePath::file(raw)?)
}

impl FileService {
    /// Writes and deletes lock their repository through `jobs`, so they
    /// never overlap a running job of the same repository.
    pub fn new(
        repositories: Arc<RepositoryRegistry>,
        jobs: Arc<JobStore>,
        access: Arc<dyn AccessControl>,
        store: Arc<dyn ResourceStore>,
        converter: Converter,
    ) -> Self {
        Self {
            repositories,
            jobs,
            access,
            validator: DryRunValidator::new(Arc::clone(&store)),
            planner: Planner::new(Arc::clone(&store), converter),
            store,
        }
    }

    fn converter(&self) -> &Converter {
        self.planner.converter()
    }

    fn repository(
        &self,
        caller: &Caller,
        operation: Operation,
        repository: &str,
    ) -> Result<Arc<dyn Repository>> {
        authorize(self.access.as_ref(), caller, operation, repository)?;
        self.repositories.get(repository)
    }

    /// Decode `data`, settle its name and stamp repository provenance.
    fn prepare(&self, repo: &dyn Repository, path: &RelativePath, data: &[u8]) -> Result<Prepared> {
        let config = repo.config();
        let decoded = self.converter().decode(data, None)?;
        let mut object = decoded.object;
        let mut rewritten = None;
        if object.metadata.name.is_empty() {
            let prefix = object.metadata.generate_name.take().unwrap_or_default();
            object.metadata.name = NameGenerator::new().generate(&prefix, &config.name, path.as_str());
            let format = FileFormat::from_path(path).unwrap_or(decoded.format);
            rewritten = Some(self.converter().encode(&object, format)?);
        }
        object.metadata.generate_name = None;

        let checksum = compute_checksum(rewritten.as_deref().unwrap_or(data));
        Provenance::repo(&config.name)
            .with_source(path.as_str(), checksum)
            .stamp(&mut object.metadata);
        provenance::set_folder(&mut object.metadata, parent_folder(config, path).as_deref());
        Ok(Prepared {
            object,
            classic: decoded.classic,
            warnings: decoded.warnings,
            rewritten,
        })
    }

    /// Reject writes over objects that another manager owns.
    async fn check_owner(&self, repository: &str, object: &ResourceObject) -> Result<()> {
        let existing = match self.store.get(&object.key()).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        match Provenance::of(&existing.metadata) {
            Some(owner) if owner.manager_kind == ManagerKind::Repo && owner.manager_id == repository => Ok(()),
            owner => {
                let holder = owner
                    .map(|p| format!("{} {}", p.manager_kind.as_str(), p.manager_id))
                    .unwrap_or_else(|| "no repository".to_string());
                Err(gitsync_resources::Error::Conflict {
                    kind: object.kind.clone(),
                    name: object.name().to_string(),
                    message: format!("already exists and is managed by {holder}"),
                }
                .into())
            }
        }
    }

    /// Read a file and preview the resource it would produce.
    ///
    /// A preview that fails validation is still returned, with the messages
    /// in `errors`.
    pub async fn read(
        &self,
        caller: &Caller,
        repository: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<ResourceWrapper> {
        let path = parse_file(path)?;
        let repo = self.repository(caller, Operation::ReadFile, repository)?;
        let file = repo.read(&path, git_ref).await?;
        let prepared = self.prepare(repo.as_ref(), &path, &file.data)?;

        let mut wrapper = ResourceWrapper::new(path, git_ref, Action::Create);
        wrapper.hash = Some(file.hash);
        wrapper.classic = prepared.classic;
        wrapper.warnings = prepared.warnings;
        match self.validator.try_apply(&prepared.object).await {
            Ok(validated) => {
                if validated.exists {
                    wrapper.action = Action::Update;
                }
                wrapper.dry_run = Some(validated.object);
            }
            Err(Error::Validation { messages }) => wrapper.errors = messages,
            Err(err) => return Err(err),
        }
        wrapper.file = Some(prepared.object);
        Ok(wrapper)
    }

    /// Write a manifest to the repository.
    ///
    /// The body is decoded and dry-run first; nothing is written when that
    /// fails. Writes to the configured branch also upsert the resource.
    /// A running job of the repository is allowed to finish first.
    ///
    /// # Errors
    ///
    /// Input errors for bad paths or manifests, `Error::Validation` when the
    /// dry run fails, and adapter errors from the write itself.
    pub async fn write(
        &self,
        caller: &Caller,
        repository: &str,
        path: &str,
        body: &[u8],
        mode: WriteMode,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<ResourceWrapper> {
        let path = parse_file(path)?;
        if FileFormat::from_path(&path).is_none() {
            return Err(Error::input("path", "only .json, .yaml and .yml files can be written"));
        }
        let repo = self.repository(caller, Operation::WriteFile, repository)?;
        let config = repo.config();
        let prepared = self.prepare(repo.as_ref(), &path, body)?;
        let _lock = self.jobs.acquire(&config.name).await;
        self.check_owner(&config.name, &prepared.object).await?;
        let validated = self.validator.try_apply(&prepared.object).await?;

        let data = prepared.rewritten.clone().unwrap_or_else(|| body.to_vec());
        repo.write(&path, data, mode, git_ref, message).await?;
        tracing::info!(repository = %config.name, path = %path, "wrote file");

        let mut wrapper = ResourceWrapper::new(
            path.clone(),
            git_ref,
            if validated.exists { Action::Update } else { Action::Create },
        );
        wrapper.classic = prepared.classic;
        wrapper.warnings = prepared.warnings;
        wrapper.dry_run = Some(validated.object);
        match repo.read(&path, git_ref).await {
            Ok(file) => wrapper.hash = Some(file.hash),
            Err(err) => {
                tracing::warn!(repository = %config.name, path = %path, error = %err, "cannot read back written file");
            }
        }

        if targets_configured_branch(config, git_ref) {
            self.ensure_folders(repo.as_ref(), &path).await?;
            let options = MutationOptions::provisioning();
            let stored = if validated.exists {
                self.store.update(prepared.object.clone(), &options).await?
            } else {
                self.store.create(prepared.object.clone(), &options).await?
            };
            wrapper.upsert = Some(stored);
        }
        wrapper.file = Some(prepared.object);
        Ok(wrapper)
    }

    /// Create the folders a file at `path` is placed in, when missing.
    async fn ensure_folders(&self, repo: &dyn Repository, path: &RelativePath) -> Result<()> {
        let config = repo.config();
        let sync_root = config.spec.sync.path.as_dir();
        let mut folders = Vec::new();
        if config.spec.sync.target == gitsync_repository::SyncTarget::Folder {
            folders.push(self.planner.root_folder_object(config)?);
        }
        for dir in path.ancestors() {
            if dir.starts_with(&sync_root) && dir != sync_root {
                folders.push(self.planner.folder_object(config, &dir)?);
            }
        }
        let options = MutationOptions::provisioning();
        for folder in folders {
            match self.store.get(&folder.key()).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    tracing::debug!(folder = %folder.key(), "creating folder for written file");
                    self.store.create(folder, &options).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Delete a file, or a whole directory when `path` ends with `/`.
    ///
    /// Waits for a running job of the repository to finish first.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing exists at `path`.
    pub async fn delete(
        &self,
        caller: &Caller,
        repository: &str,
        path: &str,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<ResourceWrapper> {
        let request = RequestPath::parse(path)?;
        let path = gitsync_fs::validate(&request, RootPolicy::Allow)?;
        let repo = self.repository(caller, Operation::DeleteFile, repository)?;
        let _lock = self.jobs.acquire(&repo.config().name).await;

        let mut wrapper = ResourceWrapper::new(path.clone(), git_ref, Action::Delete);
        if !path.is_dir() {
            let file = repo.read(&path, git_ref).await?;
            wrapper.hash = Some(file.hash);
            if let Ok(decoded) = self.converter().decode(&file.data, None) {
                wrapper.classic = decoded.classic;
                wrapper.file = Some(decoded.object);
            }
        }
        delete_path(&self.planner, repo.as_ref(), &path, git_ref, message).await?;
        Ok(wrapper)
    }

    /// Tree below `path` (a directory, or the root).
    pub async fn list(
        &self,
        caller: &Caller,
        repository: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<FileTreeNode> {
        let request = RequestPath::parse(path)?;
        let path = gitsync_fs::validate(&request, RootPolicy::Allow)?.as_dir();
        let repo = self.repository(caller, Operation::ListFiles, repository)?;
        let listing = repo.list_tree(&path, git_ref).await?;
        Ok(tree_node(&path, listing)?)
    }

    pub async fn refs(&self, caller: &Caller, repository: &str) -> Result<Vec<Ref>> {
        let repo = self.repository(caller, Operation::ListRefs, repository)?;
        Ok(repo.list_refs().await?)
    }
}

/// Delete `path` from `repo` and, on the configured branch, the resources
/// it owned. Returns how many resources were removed.
pub(crate) async fn delete_path(
    planner: &Planner,
    repo: &dyn Repository,
    path: &RelativePath,
    git_ref: Option<&str>,
    message: &str,
) -> Result<usize> {
    let config = repo.config();
    repo.delete(path, git_ref, message).await?;
    tracing::info!(repository = %config.name, path = %path, "deleted path");
    if !targets_configured_branch(config, git_ref) {
        return Ok(0);
    }

    let owned = planner.owned(&config.name).await?;
    let under = |object: &ResourceObject| {
        path.is_root()
            || object
                .metadata
                .annotation(provenance::SOURCE_PATH)
                .and_then(|source| RelativePath::parse(source).ok())
                .is_some_and(|source| {
                    if path.is_dir() {
                        source.starts_with(path)
                    } else {
                        &source == path
                    }
                })
    };
    let mut doomed: Vec<ResourceObject> = owned.resources.into_iter().filter(|o| under(o)).collect();
    let mut folders: Vec<ResourceObject> = owned.folders.into_iter().filter(|o| under(o)).collect();
    folders.sort_by_key(|folder| {
        std::cmp::Reverse(
            folder
                .metadata
                .annotation(provenance::SOURCE_PATH)
                .map_or(0, |p| p.matches('/').count()),
        )
    });
    doomed.extend(folders);

    let store_options = MutationOptions::provisioning();
    let mut removed = 0;
    for object in doomed {
        match planner.store().delete(&object.key(), &store_options).await {
            Ok(()) => removed += 1,
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AllowAll, Role, RoleBasedAccess};
    use crate::ErrorClass;
    use gitsync_repository::{
        LocalConfig, LocalRepository, RepositoryConfig, RepositorySpec, RepositoryType, SyncPolicy,
    };
    use gitsync_resources::MemoryStore;
    use gitsync_test_utils::{TestDir, fixtures};
    use pretty_assertions::assert_eq;

    const REPO: &str = "files-repo";

    fn service(dir: &TestDir, access: Arc<dyn AccessControl>) -> (Arc<MemoryStore>, FileService) {
        service_with_jobs(dir, access, Arc::new(JobStore::in_memory()))
    }

    fn service_with_jobs(
        dir: &TestDir,
        access: Arc<dyn AccessControl>,
        jobs: Arc<JobStore>,
    ) -> (Arc<MemoryStore>, FileService) {
        let config = RepositoryConfig::new(
            REPO,
            RepositorySpec {
                title: "Files".into(),
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
        let registry = Arc::new(RepositoryRegistry::new());
        registry
            .insert(Arc::new(LocalRepository::new(config).unwrap()))
            .unwrap();
        let store = Arc::new(MemoryStore::default());
        let service = FileService::new(
            registry,
            jobs,
            access,
            store.clone(),
            Converter::default(),
        );
        (store, service)
    }

    fn admin() -> Caller {
        Caller::admin("admin")
    }

    #[tokio::test]
    async fn read_previews_without_storing() {
        let dir = TestDir::new();
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let (store, files) = service(&dir, Arc::new(AllowAll));

        let wrapper = files.read(&admin(), REPO, "all-panels.json", None).await.unwrap();
        assert_eq!(wrapper.action, Action::Create);
        assert_eq!(wrapper.classic, Some(ClassicType::Dashboard));
        assert!(wrapper.dry_run.is_some());
        assert!(wrapper.errors.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn write_generates_name_and_upserts() {
        let dir = TestDir::new();
        let (store, files) = service(&dir, Arc::new(AllowAll));
        let body = b"apiVersion: dashboard.grafana.app/v1beta1\nkind: Dashboard\nmetadata:\n  generateName: prefix-\nspec:\n  title: From a request\n";

        let wrapper = files
            .write(&admin(), REPO, "nested/generated.yaml", body, WriteMode::Create, None, "add")
            .await
            .unwrap();
        assert!(wrapper.hash.is_some());
        let stored = wrapper.upsert.unwrap();
        assert!(stored.name().starts_with("prefix-"));
        assert!(Provenance::is_owned_by(&stored.metadata, REPO));
        // The folder for `nested/` plus the dashboard itself.
        assert_eq!(store.len(), 2);
        assert!(dir.read("nested/generated.yaml").contains(stored.name()));
    }

    #[tokio::test]
    async fn invalid_body_writes_nothing() {
        let dir = TestDir::new();
        let (store, files) = service(&dir, Arc::new(AllowAll));
        let body = fixtures::load("invalid-dashboard-schema.json");

        let err = files
            .write(&admin(), REPO, "invalid.json", &body, WriteMode::Upsert, None, "add")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
        dir.assert_not_exists("invalid.json");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_name_is_an_input_error() {
        let dir = TestDir::new();
        let (_, files) = service(&dir, Arc::new(AllowAll));
        let body = br#"{"apiVersion":"dashboard.grafana.app/v1beta1","kind":"Dashboard","metadata":{},"spec":{"title":"x"}}"#;

        let err = files
            .write(&admin(), REPO, "anon.json", body, WriteMode::Create, None, "add")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input);
        assert_eq!(err.field(), Some("metadata.name"));
        dir.assert_not_exists("anon.json");
    }

    #[tokio::test]
    async fn dot_segments_never_reach_the_adapter() {
        let dir = TestDir::new();
        let (_, files) = service(&dir, Arc::new(AllowAll));
        for path in ["../outside.json", "a/../b.json", "./a.json"] {
            let err = files.read(&admin(), REPO, path, None).await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::Input, "{path}");
            assert_eq!(err.field(), Some("path"));
        }
    }

    #[tokio::test]
    async fn delete_removes_file_and_owned_resource() {
        let dir = TestDir::new();
        let (store, files) = service(&dir, Arc::new(AllowAll));
        let body = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "del-me", "Delete me"));
        files
            .write(&admin(), REPO, "del.json", &body, WriteMode::Create, None, "add")
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let wrapper = files.delete(&admin(), REPO, "del.json", None, "remove").await.unwrap();
        assert_eq!(wrapper.action, Action::Delete);
        assert_eq!(wrapper.file.unwrap().name(), "del-me");
        assert!(store.is_empty());
        dir.assert_not_exists("del.json");

        let err = files.delete(&admin(), REPO, "del.json", None, "again").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn directory_delete_takes_folder_and_contents() {
        let dir = TestDir::new();
        let (store, files) = service(&dir, Arc::new(AllowAll));
        let body = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "inner", "Inner"));
        files
            .write(&admin(), REPO, "team/inner.json", &body, WriteMode::Create, None, "add")
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        files.delete(&admin(), REPO, "team/", None, "remove").await.unwrap();
        assert!(store.is_empty());
        dir.assert_not_exists("team");
    }

    #[tokio::test]
    async fn writes_wait_for_the_repository_lock() {
        let dir = TestDir::new();
        let jobs = Arc::new(JobStore::in_memory());
        let (store, files) = service_with_jobs(&dir, Arc::new(AllowAll), Arc::clone(&jobs));
        let held = jobs.try_acquire(REPO).unwrap();

        let body = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "waits", "Waits"));
        let write = {
            let files = files.clone();
            tokio::spawn(async move {
                files
                    .write(&admin(), REPO, "waits.json", &body, WriteMode::Create, None, "add")
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!write.is_finished());
        dir.assert_not_exists("waits.json");
        assert!(store.is_empty());

        drop(held);
        let wrapper = tokio::time::timeout(std::time::Duration::from_secs(5), write)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(wrapper.upsert.is_some());
        assert!(!jobs.is_busy(REPO));
    }

    #[tokio::test]
    async fn viewers_cannot_write() {
        let dir = TestDir::new();
        let (_, files) = service(&dir, Arc::new(RoleBasedAccess::default()));
        let viewer = Caller::new("v", Role::Viewer);
        let body = fixtures::to_bytes(&fixtures::dashboard("v1beta1", "x", "X"));

        let err = files
            .write(&viewer, REPO, "x.json", &body, WriteMode::Create, None, "add")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Forbidden);
        dir.assert_not_exists("x.json");
    }

    #[tokio::test]
    async fn local_repositories_have_no_refs() {
        let dir = TestDir::new();
        let (_, files) = service(&dir, Arc::new(AllowAll));
        let err = files.refs(&admin(), REPO).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Input);
    }
}
