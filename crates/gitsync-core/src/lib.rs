//! Sync engine for gitsync
//!
//! Plans and applies pulls from repositories into the resource store,
//! exports store resources back into repositories, and runs both as jobs
//! with per-repository serialization. File requests go through the
//! [`FileService`], which previews every write with a dry run.
//!
//! ```text
//! Engine
//!   ├── RepositoryRegistry   adapters by name
//!   ├── FileService          read / write / delete / list / refs
//!   └── JobController        queue, workers, JobStore
//!         └── JobRunner      Planner + Applier, Exporter
//! ```

pub mod access;
pub mod apply;
pub mod config;
pub mod dryrun;
pub mod engine;
pub mod error;
pub mod export;
pub mod files;
pub mod jobs;
pub mod logging;
pub mod planner;
pub mod registry;

pub use access::{AccessControl, AllowAll, Caller, Operation, Role, RoleBasedAccess};
pub use apply::Applier;
pub use config::{EngineConfig, PollSettings, ReadRetrySettings};
pub use dryrun::{DryRunValidator, Validated};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, ErrorClass, Result};
pub use export::Exporter;
pub use files::{FileService, ResourceWrapper};
pub use jobs::{
    COMPLETED_WITH_ERRORS, Job, JobAction, JobController, JobProgress, JobSpec, JobState,
    JobStatus, JobStore, WorkerPool, poll_until_terminal,
};
pub use planner::{Action, Plan, PlanItem, PlanOptions, Planner};
pub use registry::RepositoryRegistry;
