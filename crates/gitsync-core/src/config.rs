//! Engine configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Files are read with [`ConfigStore`], which picks TOML,
//! JSON or YAML from the extension.

use std::path::PathBuf;
use std::time::Duration;

use gitsync_fs::{ConfigStore, NormalizedPath};
use gitsync_repository::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Bounds for retrying idempotent reads against hosted providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadRetrySettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_elapsed_ms: u64,
}

impl Default for ReadRetrySettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            max_interval_ms: 2000,
            max_elapsed_ms: 10_000,
        }
    }
}

impl ReadRetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_elapsed: Duration::from_millis(self.max_elapsed_ms),
        }
    }
}

/// Backoff used by callers polling a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 50,
            max_interval_ms: 1000,
        }
    }
}

/// Settings for one [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of job workers.
    pub workers: usize,
    /// Resources applied concurrently within one job.
    pub item_concurrency: usize,
    /// Where job records are persisted. In memory only when unset.
    pub jobs_dir: Option<PathBuf>,
    /// How long finished jobs are kept before pruning.
    pub job_retention_secs: u64,
    /// Directories a local repository may point into. Empty allows any.
    pub allowed_local_roots: Vec<PathBuf>,
    pub hosted_read_retries: ReadRetrySettings,
    pub poll: PollSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            item_concurrency: 8,
            jobs_dir: None,
            job_retention_secs: 86_400,
            allowed_local_roots: Vec::new(),
            hosted_read_retries: ReadRetrySettings::default(),
            poll: PollSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML, JSON or YAML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or when the loaded
    /// values do not pass [`EngineConfig::validate`].
    pub fn load(path: &NormalizedPath) -> Result<Self> {
        let config: Self = ConfigStore::new().load(path)?;
        config.validate()?;
        tracing::debug!(path = %path, workers = config.workers, "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::input("workers", "must be at least 1"));
        }
        if self.item_concurrency == 0 {
            return Err(Error::input("item_concurrency", "must be at least 1"));
        }
        Ok(())
    }

    pub fn job_retention(&self) -> chrono::Duration {
        i64::try_from(self.job_retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
