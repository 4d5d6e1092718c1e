//! The resource store collaborator
//!
//! The real store (persistence, watch, schema validation) lives outside this
//! workspace. [`ResourceStore`] is the seam the pipeline talks to, and
//! [`MemoryStore`] is a complete in-process implementation used by tests and
//! embedders without a store of their own.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::provenance::{self, ManagerKind, Provenance};
use crate::{Error, FieldCause, GroupKind, KindRegistry, ResourceKey, ResourceObject, Result};

const DEFAULT_NAMESPACE: &str = "default";

/// Who performs a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The sync pipeline itself.
    Provisioning,
    User(String),
}

impl Identity {
    /// Value recorded in the `updatedBy` annotation.
    pub fn updated_by(&self) -> String {
        match self {
            Self::Provisioning => "access-policy:provisioning".to_string(),
            Self::User(name) => format!("user:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOptions {
    /// Run every check but persist nothing.
    pub dry_run: bool,
    pub identity: Identity,
}

impl MutationOptions {
    pub fn provisioning() -> Self {
        Self {
            dry_run: false,
            identity: Identity::Provisioning,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            dry_run: false,
            identity: Identity::User(name.into()),
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Typed resource CRUD with a dry-run mode.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<ResourceObject>;

    async fn list(&self, group_kind: &GroupKind) -> Result<Vec<ResourceObject>>;

    async fn create(&self, object: ResourceObject, options: &MutationOptions) -> Result<ResourceObject>;

    async fn update(&self, object: ResourceObject, options: &MutationOptions) -> Result<ResourceObject>;

    async fn delete(&self, key: &ResourceKey, options: &MutationOptions) -> Result<()>;
}

/// A schema or policy check run on every create and update.
pub trait Admission: Send + Sync {
    /// Violated constraints, empty when the object is acceptable.
    fn admit(&self, object: &ResourceObject) -> Vec<FieldCause>;
}

/// Structural checks: served kind and version, a name, and a string title.
#[derive(Debug, Clone)]
pub struct SchemaAdmission {
    registry: KindRegistry,
}

impl SchemaAdmission {
    pub fn new(registry: KindRegistry) -> Self {
        Self { registry }
    }
}

impl Admission for SchemaAdmission {
    fn admit(&self, object: &ResourceObject) -> Vec<FieldCause> {
        let mut causes = Vec::new();
        if let Err(err) = self.registry.resolve(&object.api_version, &object.kind) {
            causes.push(FieldCause::new("apiVersion", format!("Unsupported value: {err}")));
        }
        let name = object.name();
        if name.is_empty() {
            causes.push(FieldCause::new("metadata.name", "Required value: name is required"));
        } else if name.len() > 253 || name.contains('/') || name.contains(char::is_whitespace) {
            causes.push(FieldCause::new(
                "metadata.name",
                format!("Invalid value: \"{name}\": not a valid object name"),
            ));
        }
        match &object.spec {
            Value::Object(spec) => match spec.get("title") {
                None => causes.push(FieldCause::new("spec.title", "Required value")),
                Some(Value::String(_)) => {}
                Some(other) => causes.push(FieldCause::new(
                    "spec.title",
                    format!("Invalid value: {other}: spec.title must be a string"),
                )),
            },
            _ => causes.push(FieldCause::new("spec", "Invalid value: spec must be an object")),
        }
        if let Some(panels) = object.spec.get("panels")
            && !panels.is_array()
        {
            causes.push(FieldCause::new("spec.panels", "Invalid value: must be a list"));
        }
        causes
    }
}

/// In-process [`ResourceStore`].
///
/// Mutations by [`Identity::User`] on repository-managed objects are
/// rejected as forbidden, the way the access-control layer in front of a real
/// store would.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ResourceKey, ResourceObject>>,
    admissions: Vec<Arc<dyn Admission>>,
    revision: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("objects", &self.read().len())
            .field("admissions", &self.admissions.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(KindRegistry::with_builtins())
    }
}

impl MemoryStore {
    /// A store with schema admission for `registry`.
    pub fn new(registry: KindRegistry) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            admissions: vec![Arc::new(SchemaAdmission::new(registry))],
            revision: AtomicU64::new(0),
        }
    }

    /// Add another admission check.
    pub fn with_admission(mut self, admission: Arc<dyn Admission>) -> Self {
        self.admissions.push(admission);
        self
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Every stored object, in key order.
    pub fn snapshot(&self) -> Vec<ResourceObject> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ResourceKey, ResourceObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ResourceKey, ResourceObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self, object: &ResourceObject) -> Result<()> {
        let causes: Vec<FieldCause> = self
            .admissions
            .iter()
            .flat_map(|admission| admission.admit(object))
            .collect();
        if causes.is_empty() {
            return Ok(());
        }
        Err(Error::Invalid {
            group: object.group().to_string(),
            kind: object.kind.clone(),
            name: object.name().to_string(),
            causes,
        })
    }

    fn next_revision(&self, options: &MutationOptions, current: Option<&str>) -> Option<String> {
        if options.dry_run {
            return current.map(str::to_string);
        }
        Some((self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }
}

fn not_found(key: &ResourceKey) -> Error {
    Error::NotFound {
        group: key.group_kind.group.clone(),
        kind: key.group_kind.kind.clone(),
        name: key.name.clone(),
    }
}

/// Reject user writes that touch repository-managed objects.
fn check_ownership(
    key: &ResourceKey,
    existing: Option<&ResourceObject>,
    incoming: Option<&ResourceObject>,
    options: &MutationOptions,
) -> Result<()> {
    if options.identity == Identity::Provisioning {
        return Ok(());
    }
    if let Some(owner) = existing.and_then(|e| Provenance::of(&e.metadata))
        && owner.manager_kind == ManagerKind::Repo
    {
        return Err(Error::Forbidden {
            message: format!(
                "{key} is managed by repository {}; change it through the repository",
                owner.manager_id
            ),
        });
    }
    if incoming.is_some_and(|o| o.metadata.annotation(provenance::MANAGED_BY).is_some()) {
        return Err(Error::Forbidden {
            message: format!("{key}: manager annotations can only be set by provisioning"),
        });
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<ResourceObject> {
        self.read().get(key).cloned().ok_or_else(|| not_found(key))
    }

    async fn list(&self, group_kind: &GroupKind) -> Result<Vec<ResourceObject>> {
        Ok(self
            .read()
            .iter()
            .filter(|(key, _)| &key.group_kind == group_kind)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: ResourceObject, options: &MutationOptions) -> Result<ResourceObject> {
        let key = object.key();
        self.admit(&object)?;
        let mut objects = self.write();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                group: key.group_kind.group,
                kind: key.group_kind.kind,
                name: key.name,
            });
        }
        check_ownership(&key, None, Some(&object), options)?;

        object.metadata.generate_name = None;
        object
            .metadata
            .namespace
            .get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
        object.metadata.resource_version = self.next_revision(options, None);
        object.metadata.generation = Some(1);
        object
            .metadata
            .set_annotation(provenance::UPDATED_BY, options.identity.updated_by());

        if !options.dry_run {
            tracing::debug!(resource = %key, "created resource");
            objects.insert(key, object.clone());
        }
        Ok(object)
    }

    async fn update(&self, mut object: ResourceObject, options: &MutationOptions) -> Result<ResourceObject> {
        let key = object.key();
        let mut objects = self.write();
        let existing = objects.get(&key).ok_or_else(|| not_found(&key))?;
        if let Some(expected) = object.metadata.resource_version.as_deref()
            && existing.metadata.resource_version.as_deref() != Some(expected)
        {
            return Err(Error::Conflict {
                kind: key.group_kind.kind.clone(),
                name: key.name.clone(),
                message: "the object has been modified; apply your changes to the latest version"
                    .into(),
            });
        }
        check_ownership(&key, Some(existing), Some(&object), options)?;
        self.admit(&object)?;

        let generation = existing.metadata.generation.unwrap_or(1);
        object.metadata.generation = Some(if existing.spec == object.spec {
            generation
        } else {
            generation + 1
        });
        object.metadata.namespace = existing.metadata.namespace.clone();
        if object.status.is_none() {
            object.status = existing.status.clone();
        }
        object.metadata.resource_version =
            self.next_revision(options, existing.metadata.resource_version.as_deref());
        object
            .metadata
            .set_annotation(provenance::UPDATED_BY, options.identity.updated_by());

        if !options.dry_run {
            tracing::debug!(resource = %key, "updated resource");
            objects.insert(key, object.clone());
        }
        Ok(object)
    }

    async fn delete(&self, key: &ResourceKey, options: &MutationOptions) -> Result<()> {
        let mut objects = self.write();
        let existing = objects.get(key).ok_or_else(|| not_found(key))?;
        check_ownership(key, Some(existing), None, options)?;
        if !options.dry_run {
            objects.remove(key);
            tracing::debug!(resource = %key, "deleted resource");
        }
        Ok(())
    }
}
