//! Plan application
//!
//! Folders are written one at a time, parents first. Resource creates and
//! updates run concurrently up to a bound, each dry-run validated before it
//! is committed. Deletes follow, then folder deletes, so no folder is
//! removed while it still holds resources this plan is deleting.
//!
//! Failures are recorded per item and nothing already applied is undone.

use std::sync::Arc;

use gitsync_resources::{MutationOptions, ResourceStore};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dryrun::DryRunValidator;
use crate::jobs::JobProgress;
use crate::planner::{Action, Plan, PlanItem};
use crate::{Error, Result};

/// Applies [`Plan`]s to the store as the provisioning identity.
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn ResourceStore>,
    validator: DryRunValidator,
    concurrency: usize,
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Applier {
    pub fn new(store: Arc<dyn ResourceStore>, concurrency: usize) -> Self {
        Self {
            validator: DryRunValidator::new(Arc::clone(&store)),
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Apply `plan`, recording outcomes and failures in `progress`.
    ///
    /// Planning errors are copied into `progress` first so the error list
    /// keeps the order in which problems were found.
    pub async fn apply(&self, plan: Plan, progress: &mut JobProgress) -> Result<()> {
        progress.unchanged += plan.unchanged;
        progress.skipped += plan.skipped;
        progress.errors.extend(plan.errors);

        for item in plan.folders {
            let outcome = apply_item(self.store.clone(), self.validator.clone(), item.clone()).await;
            record(progress, &item, outcome);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, item) in plan.resources.iter().cloned().enumerate() {
            let permit = semaphore.clone().acquire_owned().await.map_err(|_| Error::Task {
                message: "apply semaphore closed".into(),
            })?;
            let store = self.store.clone();
            let validator = self.validator.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, apply_item(store, validator, item).await)
            });
        }
        let mut outcomes: Vec<Option<Result<Action>>> =
            (0..plan.resources.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined?;
            outcomes[index] = Some(outcome);
        }
        for (item, outcome) in plan.resources.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                Err(Error::Task {
                    message: "apply task vanished".into(),
                })
            });
            record(progress, item, outcome);
        }

        for item in plan.deletes.into_iter().chain(plan.folder_deletes) {
            let outcome = apply_item(self.store.clone(), self.validator.clone(), item.clone()).await;
            record(progress, &item, outcome);
        }
        Ok(())
    }
}

async fn apply_item(
    store: Arc<dyn ResourceStore>,
    validator: DryRunValidator,
    item: PlanItem,
) -> Result<Action> {
    let options = MutationOptions::provisioning();
    match item.action {
        Action::Create | Action::Update => {
            let object = item.object.ok_or_else(|| Error::Task {
                message: format!("{} has no desired object", item.key),
            })?;
            let validated = validator.try_apply(&object).await?;
            if validated.exists {
                store.update(object, &options).await?;
                Ok(Action::Update)
            } else {
                store.create(object, &options).await?;
                Ok(Action::Create)
            }
        }
        Action::Delete => match store.delete(&item.key, &options).await {
            Ok(()) => Ok(Action::Delete),
            Err(err) if err.is_not_found() => {
                tracing::debug!(resource = %item.key, "already deleted");
                Ok(Action::Delete)
            }
            Err(err) => Err(err.into()),
        },
    }
}

fn record(progress: &mut JobProgress, item: &PlanItem, outcome: Result<Action>) {
    match outcome {
        Ok(action) => {
            tracing::debug!(resource = %item.key, %action, "applied");
            progress.record(action);
        }
        Err(Error::Validation { messages }) => {
            tracing::warn!(resource = %item.key, "resource failed validation");
            progress.errors.extend(messages);
        }
        Err(err) => {
            tracing::warn!(resource = %item.key, error = %err, "cannot apply item");
            progress.error(format!("{}: {err}", item.describe()));
        }
    }
}
