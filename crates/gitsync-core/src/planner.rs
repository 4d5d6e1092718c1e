//! Sync planning
//!
//! A pull walks the repository tree below the sync path and compares every
//! manifest with the store objects owned by the repository. The result is a
//! [`Plan`]: folder creates and updates (parents first), resource creates
//! and updates, resource deletes, then folder deletes (deepest first).
//!
//! Ownership is read from provenance annotations. The source checksum
//! recorded on each owned object decides between update and no-op, and an
//! owned object whose source path was not visited is deleted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use gitsync_fs::RelativePath;
use gitsync_fs::checksum::compute_checksum;
use gitsync_repository::{Repository, RepositoryConfig, SyncTarget, TreeListing};
use gitsync_resources::provenance::{self, ManagerKind};
use gitsync_resources::{
    Converter, FileFormat, GroupKind, NameGenerator, Provenance, ResourceKey, ResourceObject,
    ResourceStore, slugify,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Longest slug kept in a generated folder name.
const FOLDER_SLUG_MAX: usize = 40;

/// What happens to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One planned mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub action: Action,
    pub key: ResourceKey,
    /// Repository path the object comes from.
    pub path: Option<String>,
    /// Desired object for creates and updates, provenance already stamped.
    pub object: Option<ResourceObject>,
}

impl PlanItem {
    fn upsert(action: Action, object: ResourceObject) -> Self {
        Self {
            action,
            key: object.key(),
            path: object
                .metadata
                .annotation(provenance::SOURCE_PATH)
                .map(str::to_string),
            object: Some(object),
        }
    }

    fn delete(existing: &ResourceObject) -> Self {
        Self {
            action: Action::Delete,
            key: existing.key(),
            path: existing
                .metadata
                .annotation(provenance::SOURCE_PATH)
                .map(str::to_string),
            object: None,
        }
    }

    /// Path when known, else the resource key.
    pub fn describe(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => self.key.to_string(),
        }
    }
}

/// Ordered set of mutations reconciling the store with a repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub repository: String,
    /// Folder creates and updates, parents before children.
    pub folders: Vec<PlanItem>,
    /// Resource creates and updates; independent of each other.
    pub resources: Vec<PlanItem>,
    pub deletes: Vec<PlanItem>,
    /// Folder deletes, deepest first.
    pub folder_deletes: Vec<PlanItem>,
    /// Files and folders already in sync.
    pub unchanged: usize,
    /// Files that are not manifests.
    pub skipped: usize,
    /// Per-file failures found while planning, in walk order.
    pub errors: Vec<String>,
}

impl Plan {
    fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            ..Self::default()
        }
    }

    /// Whether applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
            && self.resources.is_empty()
            && self.deletes.is_empty()
            && self.folder_deletes.is_empty()
    }

    /// Every item in application order.
    pub fn items(&self) -> impl Iterator<Item = &PlanItem> {
        self.folders
            .iter()
            .chain(&self.resources)
            .chain(&self.deletes)
            .chain(&self.folder_deletes)
    }

    pub fn count(&self, action: Action) -> usize {
        self.items().filter(|item| item.action == action).count()
    }

    pub fn len(&self) -> usize {
        self.items().count()
    }
}

/// Options for [`Planner::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Read from this ref instead of the configured branch.
    pub git_ref: Option<String>,
    /// Take over existing objects that no manager claims.
    pub adopt_unmanaged: bool,
}

/// Deterministic store name of the folder for directory `dir`.
pub fn folder_name(repository: &str, dir: &RelativePath) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repository.as_bytes());
    hasher.update([0]);
    hasher.update(dir.as_dir().as_str().as_bytes());
    let digest = hasher.finalize();
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    let slug: String = slugify(dir.file_name().unwrap_or(repository))
        .chars()
        .take(FOLDER_SLUG_MAX)
        .collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        hash
    } else {
        format!("{slug}-{hash}")
    }
}

/// Folder an object at `path` is placed in.
///
/// Directories below the sync path map to folders. Items directly in the
/// sync path go into the repository's root folder when the target is a
/// folder, and stay at the top level when the target is the instance.
pub fn parent_folder(config: &RepositoryConfig, path: &RelativePath) -> Option<String> {
    let sync_root = config.spec.sync.path.as_dir();
    match path.parent() {
        Some(parent) if parent.starts_with(&sync_root) && parent != sync_root => {
            Some(folder_name(&config.name, &parent))
        }
        _ => match config.spec.sync.target {
            SyncTarget::Folder => Some(config.name.clone()),
            SyncTarget::Instance => None,
        },
    }
}

/// Whether a write to `git_ref` lands on the branch the store mirrors.
pub fn targets_configured_branch(config: &RepositoryConfig, git_ref: Option<&str>) -> bool {
    match git_ref {
        None => true,
        Some(name) => config.spec.branch() == Some(name),
    }
}

/// Owned store objects split into folders and everything else.
#[derive(Debug, Default)]
pub struct Owned {
    pub folders: Vec<ResourceObject>,
    pub resources: Vec<ResourceObject>,
}

struct WalkState {
    plan: Plan,
    by_path: BTreeMap<String, ResourceObject>,
    stale: Vec<ResourceObject>,
    claimed: HashSet<ResourceKey>,
    names: NameGenerator,
    desired_folders: BTreeMap<String, (usize, ResourceObject)>,
}

/// Diffs repository trees against the store.
#[derive(Clone)]
pub struct Planner {
    store: Arc<dyn ResourceStore>,
    converter: Converter,
}

impl fmt::Debug for Planner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Planner").finish_non_exhaustive()
    }
}

impl Planner {
    pub fn new(store: Arc<dyn ResourceStore>, converter: Converter) -> Self {
        Self { store, converter }
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    fn folder_kind(&self) -> Result<GroupKind> {
        self.converter
            .registry()
            .folder()
            .map(|info| info.group_kind())
            .ok_or_else(|| Error::not_found("folder kind"))
    }

    /// Every store object owned by `repository`.
    pub async fn owned(&self, repository: &str) -> Result<Owned> {
        let folder_kind = self.folder_kind()?;
        let mut owned = Owned::default();
        for info in self.converter.registry().iter() {
            let group_kind = info.group_kind();
            for object in self.store.list(&group_kind).await? {
                if !Provenance::is_owned_by(&object.metadata, repository) {
                    continue;
                }
                if group_kind == folder_kind {
                    owned.folders.push(object);
                } else {
                    owned.resources.push(object);
                }
            }
        }
        Ok(owned)
    }

    /// Folder object for directory `dir`, owned by the repository.
    pub fn folder_object(&self, config: &RepositoryConfig, dir: &RelativePath) -> Result<ResourceObject> {
        let dir = dir.as_dir();
        let title = dir.file_name().unwrap_or(&config.name).to_string();
        let parent = parent_folder(config, &dir);
        self.build_folder(config, folder_name(&config.name, &dir), title, parent, &dir)
    }

    /// The folder every top-level item goes into when syncing to a folder.
    pub fn root_folder_object(&self, config: &RepositoryConfig) -> Result<ResourceObject> {
        let title = if config.spec.title.is_empty() {
            config.name.clone()
        } else {
            config.spec.title.clone()
        };
        let sync_root = config.spec.sync.path.as_dir();
        self.build_folder(config, config.name.clone(), title, None, &sync_root)
    }

    fn build_folder(
        &self,
        config: &RepositoryConfig,
        name: String,
        title: String,
        parent: Option<String>,
        dir: &RelativePath,
    ) -> Result<ResourceObject> {
        let info = self
            .converter
            .registry()
            .folder()
            .ok_or_else(|| Error::not_found("folder kind"))?;
        let checksum = compute_checksum(
            format!("{title}\n{}", parent.as_deref().unwrap_or_default()).as_bytes(),
        );
        let mut object = ResourceObject::new(info.preferred_api_version(), info.kind.clone(), name)
            .with_spec(json!({ "title": title }));
        Provenance::repo(&config.name)
            .with_source(dir.as_str(), checksum)
            .stamp(&mut object.metadata);
        provenance::set_folder(&mut object.metadata, parent.as_deref());
        Ok(object)
    }

    /// Plan a pull of `repo` into the store.
    ///
    /// # Errors
    ///
    /// Fails only when the tree cannot be listed or the store cannot be
    /// read. Per-file problems are collected in [`Plan::errors`].
    pub async fn plan(&self, repo: &dyn Repository, options: &PlanOptions) -> Result<Plan> {
        let config = repo.config();
        let sync_root = config.spec.sync.path.as_dir();
        let git_ref = options.git_ref.as_deref();

        let owned = self.owned(&config.name).await?;
        let mut owned_folders: BTreeMap<String, ResourceObject> = owned
            .folders
            .into_iter()
            .map(|folder| (folder.name().to_string(), folder))
            .collect();
        let mut state = WalkState {
            plan: Plan::new(&config.name),
            by_path: BTreeMap::new(),
            stale: Vec::new(),
            claimed: HashSet::new(),
            names: NameGenerator::new(),
            desired_folders: BTreeMap::new(),
        };
        for object in owned.resources {
            match object.metadata.annotation(provenance::SOURCE_PATH) {
                Some(path) => {
                    let path = path.to_string();
                    state.by_path.insert(path, object);
                }
                None => state.stale.push(object),
            }
        }

        if config.spec.sync.target == SyncTarget::Folder {
            let root = self.root_folder_object(config)?;
            state
                .desired_folders
                .insert(root.name().to_string(), (0, root));
        }

        let listing = self.list(repo, &sync_root, git_ref).await?;
        for entry in listing {
            let entry = entry?;
            if entry.path.is_hidden() {
                tracing::trace!(path = %entry.path, "skipping hidden entry");
                continue;
            }
            if entry.is_dir {
                let folder = self.folder_object(config, &entry.path)?;
                state
                    .desired_folders
                    .insert(folder.name().to_string(), (entry.path.depth(), folder));
                continue;
            }
            if FileFormat::from_path(&entry.path).is_none() {
                tracing::debug!(path = %entry.path, "skipping non-manifest file");
                state.plan.skipped += 1;
                continue;
            }
            if let Err(err) = self.plan_file(repo, &entry.path, options, &mut state).await {
                tracing::warn!(repository = %config.name, path = %entry.path, error = %err, "cannot plan file");
                state.plan.errors.push(format!("{}: {err}", entry.path));
                // The file is still there; what it produced last time stays.
                if let Some(previous) = state.by_path.remove(entry.path.as_str()) {
                    state.claimed.insert(previous.key());
                }
            }
        }

        self.plan_folders(options, &mut owned_folders, &mut state).await?;

        let WalkState {
            mut plan,
            by_path,
            stale,
            claimed,
            ..
        } = state;
        for object in by_path.into_values().chain(stale) {
            if !claimed.contains(&object.key()) {
                plan.deletes.push(PlanItem::delete(&object));
            }
        }
        plan.folder_deletes = folder_deletes(owned_folders.into_values());

        tracing::debug!(
            repository = %config.name,
            create = plan.count(Action::Create),
            update = plan.count(Action::Update),
            delete = plan.count(Action::Delete),
            unchanged = plan.unchanged,
            "planned pull"
        );
        Ok(plan)
    }

    async fn list(
        &self,
        repo: &dyn Repository,
        sync_root: &RelativePath,
        git_ref: Option<&str>,
    ) -> Result<TreeListing> {
        match repo.list_tree(sync_root, git_ref).await {
            Ok(listing) => Ok(listing),
            Err(gitsync_repository::Error::NotFound { .. }) if !sync_root.is_root() => {
                tracing::debug!(path = %sync_root, "sync path absent, nothing to pull");
                Ok(Box::new(std::iter::empty()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn plan_file(
        &self,
        repo: &dyn Repository,
        path: &RelativePath,
        options: &PlanOptions,
        state: &mut WalkState,
    ) -> Result<()> {
        let config = repo.config();
        let file = repo.read(path, options.git_ref.as_deref()).await?;
        let checksum = compute_checksum(&file.data);
        let decoded = self.converter.decode(&file.data, None)?;
        let mut object = decoded.object;
        for warning in decoded.warnings {
            tracing::debug!(path = %path, %warning, "conversion note");
        }

        let previous = state.by_path.remove(path.as_str());
        if object.metadata.name.is_empty() {
            let prefix = object.metadata.generate_name.clone().unwrap_or_default();
            object.metadata.name = match &previous {
                Some(prev)
                    if prev.group_kind() == object.group_kind()
                        && prev.name().starts_with(&prefix) =>
                {
                    prev.name().to_string()
                }
                _ => state.names.generate(&prefix, &config.name, path.as_str()),
            };
        }
        object.metadata.generate_name = None;

        let key = object.key();
        if !state.claimed.insert(key.clone()) {
            if let Some(prev) = previous {
                state.stale.push(prev);
            }
            return Err(gitsync_resources::Error::Conflict {
                kind: key.group_kind.kind.clone(),
                name: key.name.clone(),
                message: "declared by more than one file".into(),
            }
            .into());
        }
        state.names.reserve(&key.name);

        Provenance::repo(&config.name)
            .with_source(path.as_str(), checksum.clone())
            .stamp(&mut object.metadata);
        let folder = parent_folder(config, path);
        provenance::set_folder(&mut object.metadata, folder.as_deref());

        if let Some(prev) = previous
            && prev.key() != key
        {
            // Same file, new identity: the old object goes away.
            state.stale.push(prev);
        }

        let existing = match self.store.get(&key).await {
            Ok(existing) => Some(existing),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        let Some(existing) = existing else {
            state.plan.resources.push(PlanItem::upsert(Action::Create, object));
            return Ok(());
        };

        let owner = Provenance::of(&existing.metadata);
        let owned = owner
            .as_ref()
            .is_some_and(|p| p.manager_kind == ManagerKind::Repo && p.manager_id == config.name);
        if !owned && !(options.adopt_unmanaged && owner.is_none()) {
            let holder = owner
                .map(|p| format!("{} {}", p.manager_kind.as_str(), p.manager_id))
                .unwrap_or_else(|| "no repository".to_string());
            return Err(gitsync_resources::Error::Conflict {
                kind: key.group_kind.kind.clone(),
                name: key.name.clone(),
                message: format!("already exists and is managed by {holder}"),
            }
            .into());
        }

        if owned
            && let Some(old_path) = existing.metadata.annotation(provenance::SOURCE_PATH)
            && old_path != path.as_str()
        {
            // Moved file: the object follows it instead of being deleted.
            state.by_path.remove(old_path);
        }

        let in_sync = owned
            && existing.metadata.annotation(provenance::SOURCE_CHECKSUM) == Some(checksum.as_str())
            && existing.metadata.annotation(provenance::SOURCE_PATH) == Some(path.as_str())
            && provenance::folder(&existing.metadata) == folder.as_deref()
            && existing.api_version == object.api_version;
        if in_sync {
            state.plan.unchanged += 1;
        } else {
            state.plan.resources.push(PlanItem::upsert(Action::Update, object));
        }
        Ok(())
    }

    async fn plan_folders(
        &self,
        options: &PlanOptions,
        owned_folders: &mut BTreeMap<String, ResourceObject>,
        state: &mut WalkState,
    ) -> Result<()> {
        let mut desired: Vec<(usize, ResourceObject)> =
            std::mem::take(&mut state.desired_folders).into_values().collect();
        desired.sort_by(|(a, x), (b, y)| a.cmp(b).then_with(|| x.name().cmp(y.name())));

        for (_, folder) in desired {
            let key = folder.key();
            if let Some(existing) = owned_folders.remove(folder.name()) {
                let same = existing.metadata.annotation(provenance::SOURCE_CHECKSUM)
                    == folder.metadata.annotation(provenance::SOURCE_CHECKSUM)
                    && existing.metadata.annotation(provenance::SOURCE_PATH)
                        == folder.metadata.annotation(provenance::SOURCE_PATH);
                if same {
                    state.plan.unchanged += 1;
                } else {
                    state.plan.folders.push(PlanItem::upsert(Action::Update, folder));
                }
                continue;
            }
            match self.store.get(&key).await {
                Ok(existing) => {
                    let owner = Provenance::of(&existing.metadata);
                    if options.adopt_unmanaged && owner.is_none() {
                        state.plan.folders.push(PlanItem::upsert(Action::Update, folder));
                    } else {
                        state.plan.errors.push(format!(
                            "{}: folder {key} already exists and is not managed by repository {}",
                            folder
                                .metadata
                                .annotation(provenance::SOURCE_PATH)
                                .unwrap_or_default(),
                            state.plan.repository
                        ));
                    }
                }
                Err(err) if err.is_not_found() => {
                    state.plan.folders.push(PlanItem::upsert(Action::Create, folder));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Plan the removal of everything `repository` owns.
    pub async fn cleanup(&self, repository: &str) -> Result<Plan> {
        let owned = self.owned(repository).await?;
        let mut plan = Plan::new(repository);
        plan.deletes = owned.resources.iter().map(PlanItem::delete).collect();
        plan.folder_deletes = folder_deletes(owned.folders);
        tracing::debug!(repository = %repository, items = plan.len(), "planned cleanup");
        Ok(plan)
    }
}

/// Delete items for `folders`, deepest source path first.
fn folder_deletes(folders: impl IntoIterator<Item = ResourceObject>) -> Vec<PlanItem> {
    let mut folders: Vec<(usize, ResourceObject)> = folders
        .into_iter()
        .map(|folder| {
            let depth = folder
                .metadata
                .annotation(provenance::SOURCE_PATH)
                .and_then(|p| RelativePath::parse(p).ok())
                .map_or(0, |p| p.depth());
            (depth, folder)
        })
        .collect();
    folders.sort_by(|(a, x), (b, y)| b.cmp(a).then_with(|| x.name().cmp(y.name())));
    folders.iter().map(|(_, folder)| PlanItem::delete(folder)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsync_repository::{LocalConfig, LocalRepository, RepositorySpec, RepositoryType, SyncPolicy};
    use gitsync_resources::MemoryStore;
    use gitsync_test_utils::{TestDir, fixtures};
    use pretty_assertions::assert_eq;

    fn local_config(dir: &TestDir, target: SyncTarget) -> RepositoryConfig {
        RepositoryConfig::new(
            "local-repo",
            RepositorySpec {
                title: "Local repo".into(),
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
                    target,
                    ..SyncPolicy::default()
                },
            },
        )
    }

    fn planner() -> (Arc<MemoryStore>, Planner) {
        let store = Arc::new(MemoryStore::default());
        (store.clone(), Planner::new(store, Converter::default()))
    }

    #[test]
    fn folder_names_are_stable_and_distinct() {
        let a = RelativePath::parse("team/a/").unwrap();
        let b = RelativePath::parse("other/a/").unwrap();
        assert_eq!(folder_name("repo", &a), folder_name("repo", &a));
        assert_ne!(folder_name("repo", &a), folder_name("repo", &b));
        assert!(folder_name("repo", &a).starts_with("a-"));
    }

    #[tokio::test]
    async fn new_files_are_created_with_folders_first() {
        let dir = TestDir::new();
        dir.copy_fixture("all-panels.json", "all-panels.json");
        dir.copy_fixture("text-options.json", "team/text-options.json");
        dir.write(".keep", "");
        dir.write("README.md", "# notes");
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Instance)).unwrap();
        let (_, planner) = planner();

        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert_eq!(plan.errors, Vec::<String>::new());
        assert_eq!(plan.folders.len(), 1);
        assert_eq!(plan.resources.len(), 2);
        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.count(Action::Create), 3);

        let team = folder_name("local-repo", &RelativePath::parse("team/").unwrap());
        let nested = plan
            .resources
            .iter()
            .find(|item| item.path.as_deref() == Some("team/text-options.json"))
            .and_then(|item| item.object.as_ref())
            .unwrap();
        assert_eq!(provenance::folder(&nested.metadata), Some(team.as_str()));
        let top = plan
            .resources
            .iter()
            .find(|item| item.key.name == fixtures::ALL_PANELS_UID)
            .and_then(|item| item.object.as_ref())
            .unwrap();
        assert_eq!(provenance::folder(&top.metadata), None);
        assert!(Provenance::is_owned_by(&top.metadata, "local-repo"));
    }

    #[tokio::test]
    async fn folder_target_adds_a_root_folder() {
        let dir = TestDir::new();
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Folder)).unwrap();
        let (_, planner) = planner();

        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert_eq!(plan.folders[0].key.name, "local-repo");
        let object = plan.resources[0].object.as_ref().unwrap();
        assert_eq!(provenance::folder(&object.metadata), Some("local-repo"));
    }

    #[tokio::test]
    async fn undecodable_files_are_reported_not_fatal() {
        let dir = TestDir::new();
        dir.write("broken.json", "{ not json");
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Instance)).unwrap();
        let (_, planner) = planner();

        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert_eq!(plan.resources.len(), 1);
        assert_eq!(plan.errors.len(), 1);
        assert!(plan.errors[0].starts_with("broken.json: "));
    }

    #[tokio::test]
    async fn unreadable_files_keep_their_resources() {
        let dir = TestDir::new();
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Instance)).unwrap();
        let (store, planner) = planner();
        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        let object = plan.resources[0].object.clone().unwrap();
        store
            .create(object, &gitsync_resources::MutationOptions::provisioning())
            .await
            .unwrap();

        dir.write("all-panels.json", "{ not json");
        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert_eq!(plan.errors.len(), 1);
        assert!(plan.errors[0].starts_with("all-panels.json: "));
        assert!(plan.deletes.is_empty(), "unexpected deletes: {:?}", plan.deletes);
        assert_eq!(plan.count(Action::Delete), 0);
    }

    #[tokio::test]
    async fn foreign_objects_conflict() {
        let dir = TestDir::new();
        dir.copy_fixture("all-panels.json", "all-panels.json");
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Instance)).unwrap();
        let (store, planner) = planner();
        let mut foreign = ResourceObject::new(
            "dashboard.grafana.app/v0alpha1",
            "Dashboard",
            fixtures::ALL_PANELS_UID,
        )
        .with_spec(json!({ "title": "someone else's" }));
        Provenance::repo("other-repo").stamp(&mut foreign.metadata);
        store
            .create(foreign, &gitsync_resources::MutationOptions::provisioning())
            .await
            .unwrap();

        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert!(plan.resources.is_empty());
        assert_eq!(plan.errors.len(), 1);
        assert!(plan.errors[0].contains("managed by repo other-repo"));
    }

    #[tokio::test]
    async fn generated_names_are_reused_across_pulls() {
        let dir = TestDir::new();
        dir.write(
            "generated.yaml",
            "apiVersion: dashboard.grafana.app/v1beta1\nkind: Dashboard\nmetadata:\n  generateName: gen-\nspec:\n  title: Generated\n",
        );
        let repo = LocalRepository::new(local_config(&dir, SyncTarget::Instance)).unwrap();
        let (store, planner) = planner();

        let plan = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        let object = plan.resources[0].object.clone().unwrap();
        assert!(object.name().starts_with("gen-"));
        assert_eq!(object.name().len(), "gen-".len() + 5);
        store
            .create(object.clone(), &gitsync_resources::MutationOptions::provisioning())
            .await
            .unwrap();

        let again = planner.plan(&repo, &PlanOptions::default()).await.unwrap();
        assert!(again.is_empty(), "unexpected plan: {again:?}");
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn cleanup_deletes_folders_last_and_deepest_first() {
        let (store, planner) = planner();
        let dir = TestDir::new();
        let config = local_config(&dir, SyncTarget::Instance);
        let options = gitsync_resources::MutationOptions::provisioning();
        for path in ["a/", "a/b/"] {
            let folder = planner
                .folder_object(&config, &RelativePath::parse(path).unwrap())
                .unwrap();
            store.create(folder, &options).await.unwrap();
        }
        let mut dashboard =
            ResourceObject::new("dashboard.grafana.app/v1beta1", "Dashboard", "d1")
                .with_spec(json!({ "title": "D1" }));
        Provenance::repo("local-repo")
            .with_source("a/b/d1.json", "sha256:00")
            .stamp(&mut dashboard.metadata);
        store.create(dashboard, &options).await.unwrap();

        let plan = planner.cleanup("local-repo").await.unwrap();
        let order: Vec<String> = plan.items().map(PlanItem::describe).collect();
        assert_eq!(order, vec!["a/b/d1.json", "a/b/", "a/"]);
    }
}
