//! Export of store resources into repository files
//!
//! Each resource is written at the version it is stored at, with server
//! fields stripped, to a path derived from its folder chain and title. The
//! same resource always lands on the same path, so exporting twice only
//! rewrites identical content.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use gitsync_fs::{RelativePath, join_relative};
use gitsync_repository::{Repository, WriteMode};
use gitsync_resources::provenance;
use gitsync_resources::{Converter, FileFormat, Provenance, ResourceObject, ResourceStore, slugify};

use crate::jobs::{JobProgress, PushOptions};
use crate::{Error, Result};

const DEFAULT_MESSAGE: &str = "Export from gitsync";

/// Writes unmanaged store resources into a repository.
#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn ResourceStore>,
    converter: Converter,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter").finish_non_exhaustive()
    }
}

/// Repository-relative directory of every folder, keyed by folder name.
struct FolderPaths {
    parents: BTreeMap<String, Option<String>>,
    dirs: BTreeMap<String, String>,
}

impl FolderPaths {
    fn new(folders: &[ResourceObject]) -> Self {
        let mut parents = BTreeMap::new();
        let mut dirs = BTreeMap::new();
        for folder in folders {
            let slug = folder
                .title()
                .map(slugify)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| slugify(folder.name()));
            parents.insert(
                folder.name().to_string(),
                provenance::folder(&folder.metadata).map(str::to_string),
            );
            dirs.insert(folder.name().to_string(), slug);
        }
        Self { parents, dirs }
    }

    /// Directory segments for `folder`, outermost first. Unknown folders and
    /// cycles end the chain.
    fn path_of(&self, folder: Option<&str>) -> Vec<String> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut current = folder.map(str::to_string);
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                break;
            }
            let Some(slug) = self.dirs.get(&name) else {
                break;
            };
            segments.push(slug.clone());
            current = self.parents.get(&name).cloned().flatten();
        }
        segments.reverse();
        segments
    }

    /// Whether `folder` is `scope` or nested inside it.
    fn within(&self, folder: Option<&str>, scope: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = folder.map(str::to_string);
        while let Some(name) = current {
            if name == scope {
                return true;
            }
            if !seen.insert(name.clone()) {
                return false;
            }
            current = self.parents.get(&name).cloned().flatten();
        }
        false
    }
}

impl Exporter {
    pub fn new(store: Arc<dyn ResourceStore>, converter: Converter) -> Self {
        Self { store, converter }
    }

    /// Export every unmanaged resource into `repo`.
    ///
    /// Resources already managed by a repository are skipped. Write
    /// failures are recorded per file.
    ///
    /// # Errors
    ///
    /// Fails when the repository is read only, the export path is invalid,
    /// or the store cannot be listed.
    pub async fn export(
        &self,
        repo: &dyn Repository,
        options: &PushOptions,
        progress: &mut JobProgress,
    ) -> Result<()> {
        let config = repo.config();
        if config.spec.read_only {
            return Err(gitsync_repository::Error::ReadOnly {
                name: config.name.clone(),
            }
            .into());
        }
        let base = match &options.path {
            Some(path) => join_relative(&config.spec.sync.path.as_dir(), &path.as_dir()),
            None => config.spec.sync.path.as_dir(),
        };
        let message = options.message.as_deref().unwrap_or(DEFAULT_MESSAGE);

        let registry = self.converter.registry();
        let folder_kind = registry
            .folder()
            .map(|info| info.group_kind())
            .ok_or_else(|| Error::not_found("folder kind"))?;
        let folders = self.store.list(&folder_kind).await?;
        let paths = FolderPaths::new(&folders);
        if let Some(scope) = &options.folder
            && !folders.iter().any(|f| f.name() == scope)
        {
            return Err(Error::input("spec.push.folder", format!("folder {scope} not found")));
        }

        let mut resources = Vec::new();
        for info in registry.iter() {
            let group_kind = info.group_kind();
            if group_kind == folder_kind {
                continue;
            }
            resources.extend(self.store.list(&group_kind).await?);
        }
        resources.sort_by_key(ResourceObject::key);

        let mut used: HashSet<RelativePath> = HashSet::new();
        for object in resources {
            if Provenance::is_repo_managed(&object.metadata) {
                tracing::debug!(resource = %object.key(), "skipping repository-managed resource");
                progress.skipped += 1;
                continue;
            }
            let folder = provenance::folder(&object.metadata);
            if let Some(scope) = &options.folder
                && !paths.within(folder, scope)
            {
                continue;
            }

            let path = match self.target_path(&base, &paths, &object, &mut used) {
                Ok(path) => path,
                Err(err) => {
                    progress.error(format!("{}: {err}", object.key()));
                    continue;
                }
            };
            let data = match self.converter.encode(&object, FileFormat::Json) {
                Ok(data) => data,
                Err(err) => {
                    progress.error(format!("{path}: {err}"));
                    continue;
                }
            };
            match repo
                .write(&path, data, WriteMode::Upsert, options.branch.as_deref(), message)
                .await
            {
                Ok(()) => {
                    tracing::debug!(resource = %object.key(), path = %path, "exported");
                    progress.written += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "export write failed");
                    progress.error(format!("{path}: {err}"));
                }
            }
        }
        Ok(())
    }

    fn target_path(
        &self,
        base: &RelativePath,
        paths: &FolderPaths,
        object: &ResourceObject,
        used: &mut HashSet<RelativePath>,
    ) -> Result<RelativePath> {
        let mut dir = base.clone();
        for segment in paths.path_of(provenance::folder(&object.metadata)) {
            dir = dir.child(&segment, true)?;
        }
        let preferred = dir.child(&self.converter.file_name(object, FileFormat::Json), false)?;
        if used.insert(preferred.clone()) {
            return Ok(preferred);
        }
        // Two titles share a slug: fall back to the unique object name.
        let fallback = dir.child(&format!("{}.json", slugify(object.name())), false)?;
        if used.insert(fallback.clone()) {
            return Ok(fallback);
        }
        Err(Error::AlreadyExists {
            what: format!("export path {fallback}"),
        })
    }
}
