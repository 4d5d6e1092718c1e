//! Jobs: records, storage, execution and polling

mod controller;
mod poll;
mod store;
mod types;

pub use controller::{COMPLETED_WITH_ERRORS, JobController, JobRunner, WorkerPool};
pub use poll::poll_until_terminal;
pub use store::{JobStore, RepositoryLock};
pub use types::{
    DeleteOptions, Job, JobAction, JobProgress, JobSpec, JobState, JobStatus, MigrateOptions,
    PullOptions, PushOptions,
};
