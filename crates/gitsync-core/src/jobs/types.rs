//! Job records
//!
//! A job's identity and request body are fixed when it is created; only its
//! status moves, and only forward through [`JobState`].

use std::fmt;

use chrono::{DateTime, Utc};
use gitsync_fs::{RelativePath, RequestPath, RootPolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::Action;
use crate::{Error, Result};

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    /// Repository files into the store.
    Pull,
    /// Store resources into repository files.
    Push,
    /// Remove files (and the resources they own).
    Delete,
    /// Push everything unmanaged, then pull it back as repository-owned.
    Migrate,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Delete => "delete",
            Self::Migrate => "migrate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOptions {
    /// Ref to read from instead of the configured branch.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    /// Export only this folder and what it contains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Directory below the sync path to write into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<RelativePath>,
    /// Branch to commit to instead of the configured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Repository paths; a trailing slash deletes a directory.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request body of a job: the action and its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    action: JobAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pull: Option<PullOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    push: Option<PushOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<DeleteOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    migrate: Option<MigrateOptions>,
}

impl JobSpec {
    fn bare(action: JobAction) -> Self {
        Self {
            action,
            pull: None,
            push: None,
            delete: None,
            migrate: None,
        }
    }

    pub fn pull(options: PullOptions) -> Self {
        Self {
            pull: Some(options),
            ..Self::bare(JobAction::Pull)
        }
    }

    pub fn push(options: PushOptions) -> Self {
        Self {
            push: Some(options),
            ..Self::bare(JobAction::Push)
        }
    }

    pub fn delete(options: DeleteOptions) -> Self {
        Self {
            delete: Some(options),
            ..Self::bare(JobAction::Delete)
        }
    }

    pub fn migrate(options: MigrateOptions) -> Self {
        Self {
            migrate: Some(options),
            ..Self::bare(JobAction::Migrate)
        }
    }

    pub fn action(&self) -> JobAction {
        self.action
    }

    pub fn pull_options(&self) -> PullOptions {
        self.pull.clone().unwrap_or_default()
    }

    pub fn push_options(&self) -> PushOptions {
        self.push.clone().unwrap_or_default()
    }

    pub fn delete_options(&self) -> DeleteOptions {
        self.delete.clone().unwrap_or_default()
    }

    pub fn migrate_options(&self) -> MigrateOptions {
        self.migrate.clone().unwrap_or_default()
    }

    /// Check that only the section matching the action is present and that
    /// its options are usable.
    ///
    /// # Errors
    ///
    /// `Error::Input` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let sections = [
            (JobAction::Pull, "spec.pull", self.pull.is_some()),
            (JobAction::Push, "spec.push", self.push.is_some()),
            (JobAction::Delete, "spec.delete", self.delete.is_some()),
            (JobAction::Migrate, "spec.migrate", self.migrate.is_some()),
        ];
        for (action, field, present) in sections {
            if present && action != self.action {
                return Err(Error::input(
                    field,
                    format!("not allowed for a {} job", self.action),
                ));
            }
        }

        if self.action == JobAction::Delete {
            let options = self
                .delete
                .as_ref()
                .filter(|o| !o.paths.is_empty())
                .ok_or_else(|| Error::input("spec.delete.paths", "at least one path is required"))?;
            for (index, raw) in options.paths.iter().enumerate() {
                RequestPath::parse(raw)
                    .and_then(|request| gitsync_fs::validate(&request, RootPolicy::Allow))
                    .map_err(|err| Error::input(format!("spec.delete.paths[{index}]"), err.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Working,
    Success,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Whether a job in `self` may move to `next`.
    ///
    /// A queued job may fail without ever running (its repository was
    /// removed); terminal states never change.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Working)
                | (Self::Queued, Self::Error)
                | (Self::Working, Self::Success)
                | (Self::Working, Self::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Working => "working",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Counts and messages accumulated while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Files written to the repository.
    pub written: usize,
    pub skipped: usize,
    /// Failures in order of occurrence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl JobProgress {
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Delete => self.deleted += 1,
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Mutable part of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: JobProgress,
}

impl JobStatus {
    fn queued() -> Self {
        Self {
            state: JobState::Queued,
            message: None,
            started: None,
            finished: None,
            progress: JobProgress::default(),
        }
    }
}

/// A recorded unit of sync work against one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: Uuid,
    repository: String,
    spec: JobSpec,
    created: DateTime<Utc>,
    status: JobStatus,
}

impl Job {
    pub(crate) fn new(repository: impl Into<String>, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository: repository.into(),
            spec,
            created: now,
            status: JobStatus::queued(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn action(&self) -> JobAction {
        self.spec.action
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn state(&self) -> JobState {
        self.status.state
    }

    pub(crate) fn status_mut(&mut self) -> &mut JobStatus {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(JobState::Queued, JobState::Working, true)]
    #[case(JobState::Queued, JobState::Error, true)]
    #[case(JobState::Queued, JobState::Success, false)]
    #[case(JobState::Working, JobState::Success, true)]
    #[case(JobState::Working, JobState::Queued, false)]
    #[case(JobState::Success, JobState::Error, false)]
    #[case(JobState::Error, JobState::Success, false)]
    #[case(JobState::Error, JobState::Working, false)]
    fn transitions(#[case] from: JobState, #[case] to: JobState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn spec_reads_request_body() {
        let spec: JobSpec =
            serde_json::from_str(r#"{"action":"pull","pull":{"ref":"feature"}}"#).unwrap();
        assert_eq!(spec.action(), JobAction::Pull);
        assert_eq!(spec.pull_options().git_ref.as_deref(), Some("feature"));
        spec.validate().unwrap();
    }

    #[test]
    fn mismatched_section_is_rejected() {
        let spec: JobSpec = serde_json::from_str(r#"{"action":"pull","push":{}}"#).unwrap();
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field(), Some("spec.push"));
    }

    #[rstest]
    #[case(vec![], "spec.delete.paths")]
    #[case(vec!["ok.json".to_string(), "../escape.json".to_string()], "spec.delete.paths[1]")]
    fn delete_paths_are_checked(#[case] paths: Vec<String>, #[case] field: &str) {
        let spec = JobSpec::delete(DeleteOptions {
            paths,
            git_ref: None,
        });
        assert_eq!(spec.validate().unwrap_err().field(), Some(field));
    }

    #[test]
    fn new_jobs_start_queued() {
        let job = Job::new("repo", JobSpec::pull(PullOptions::default()), Utc::now());
        assert_eq!(job.state(), JobState::Queued);
        assert!(job.status().started.is_none());
    }
}
