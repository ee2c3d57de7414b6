//! Concurrent fan-out replication of a source image to target accounts.
//!
//! Planning turns each target into a self-contained [`CopyTask`]; execution
//! dispatches the tasks onto a bounded worker pool and joins every one of
//! them before reporting. Partial failure never discards finished work: the
//! aggregate error carries the manifest entries that did succeed.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::{ImageClient, SourceImage};
use crate::config::ReplicationConfig;
use crate::manifest::{self, ManifestEntry};
use crate::progress::Progress;

mod share;
mod task;

#[cfg(test)]
mod tests;

pub use task::{CopyError, CopyTask};

/// How a target's account identifier is determined during planning.
pub enum TargetAccount {
    /// Ask the target's own credentials who they are, then share the source
    /// image with that account before copying.
    Resolve,
    /// The account id is configured up front; the caller has already
    /// arranged visibility of the source image.
    Known(String),
}

/// A replication target: a client bound to the target's credentials plus
/// how to identify its account.
pub struct ResolvedTarget {
    /// Account resolution strategy for this target.
    pub account: TargetAccount,
    /// Client bound to the target account and region.
    pub client: Arc<dyn ImageClient>,
    /// Destination region override for manifest reporting; the source
    /// region when unset.
    pub region: Option<String>,
}

/// One failed copy and the account it was destined for.
#[derive(Debug)]
pub struct TaskFailure {
    /// Target account, or `unresolved` when identity lookup failed first.
    pub account_id: String,
    /// What went wrong.
    pub error: CopyError,
}

/// Aggregate error of a replication run with at least one failed task.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Some tasks failed; the successes are preserved, not rolled back.
    #[error(
        "{}/{total} image copies failed, manual reconciliation may be required",
        failures.len()
    )]
    Partial {
        /// Manifest entries of the tasks that did succeed.
        completed: Vec<ManifestEntry>,
        /// Every failed task.
        failures: Vec<TaskFailure>,
        /// Number of planned tasks, including planning failures.
        total: usize,
    },
}

/// Planned replication run: executable tasks plus the targets that already
/// failed during planning.
pub struct ReplicationPlan {
    /// Tasks ready to dispatch.
    pub tasks: Vec<CopyTask>,
    /// Targets that failed identity resolution or sharing.
    pub failures: Vec<TaskFailure>,
}

/// Fans one source image out to N targets under a concurrency cap.
pub struct ReplicationEngine {
    progress: Arc<dyn Progress>,
    concurrency: usize,
    manifest_output: Option<Utf8PathBuf>,
}

impl ReplicationEngine {
    /// Creates an engine with one worker per task and no manifest output.
    pub fn new(progress: Arc<dyn Progress>) -> Self {
        Self {
            progress,
            concurrency: 0,
            manifest_output: None,
        }
    }

    /// Caps the number of concurrently executing tasks. Zero means one
    /// worker per task.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Writes successful outcomes to `path` after the run.
    #[must_use]
    pub fn with_manifest_output(mut self, path: Option<Utf8PathBuf>) -> Self {
        self.manifest_output = path;
        self
    }

    /// Builds one [`CopyTask`] per target.
    ///
    /// Targets that need identity resolution get the source image shared
    /// with their resolved account before any copy is attempted; a target
    /// that fails either step becomes a planning failure and is excluded
    /// from dispatch rather than aborting the whole run.
    pub async fn plan(
        &self,
        source_client: &dyn ImageClient,
        source: &SourceImage,
        targets: Vec<ResolvedTarget>,
        config: &ReplicationConfig,
    ) -> ReplicationPlan {
        let mut tasks = Vec::new();
        let mut failures = Vec::new();
        for target in targets {
            let account_id = match target.account {
                TargetAccount::Known(account_id) => account_id,
                TargetAccount::Resolve => {
                    let identity = match target.client.caller_identity().await {
                        Ok(identity) => identity,
                        Err(err) => {
                            failures.push(TaskFailure {
                                account_id: "unresolved".to_owned(),
                                error: CopyError::Identity(err),
                            });
                            continue;
                        }
                    };
                    self.progress.say(&format!(
                        "Resolved target account {} ({})",
                        identity.account_id, identity.arn
                    ));
                    if let Err(err) =
                        share::ensure_shared_with(source_client, source, &identity.account_id)
                            .await
                    {
                        failures.push(TaskFailure {
                            account_id: identity.account_id,
                            error: CopyError::Share(err),
                        });
                        continue;
                    }
                    identity.account_id
                }
            };
            tasks.push(
                CopyTask::new(Arc::clone(&target.client), source.clone(), &account_id)
                    .with_region(target.region)
                    .with_encryption(config.encrypted, config.kms_key_id.clone())
                    .with_tags_only(config.tags_only)
                    .with_ensure_available(config.ensure_available)
                    .with_extra_tags(config.tags.clone()),
            );
        }
        ReplicationPlan { tasks, failures }
    }

    /// Executes every task in the plan and joins them all.
    ///
    /// The return value is the complete manifest of successful copies. When
    /// any task fails the run reports how many of the total failed while
    /// still carrying the successes; cloud copies are not transactional and
    /// are never rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Partial`] when at least one task failed,
    /// including failures that happened during planning.
    pub async fn replicate(
        &self,
        plan: ReplicationPlan,
    ) -> Result<Vec<ManifestEntry>, ReplicationError> {
        let total = plan.tasks.len() + plan.failures.len();
        let mut failures = plan.failures;
        let mut entries = Vec::new();

        let cap = if self.concurrency == 0 {
            plan.tasks.len().max(1)
        } else {
            self.concurrency
        };
        let semaphore = Arc::new(Semaphore::new(cap));
        let mut workers = JoinSet::new();
        for task in plan.tasks {
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&self.progress);
            workers.spawn(async move {
                // The semaphore is never closed, so the permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                let account_id = task.target_account().to_owned();
                (account_id, task.execute(progress.as_ref()).await)
            });
        }
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(entry))) => entries.push(entry),
                Ok((account_id, Err(error))) => failures.push(TaskFailure { account_id, error }),
                Err(err) => failures.push(TaskFailure {
                    account_id: "unknown".to_owned(),
                    error: CopyError::Worker(err.to_string()),
                }),
            }
        }

        if let Some(path) = &self.manifest_output {
            self.progress
                .say(&format!("Writing replication manifest to {path}"));
            if let Err(err) = manifest::write_manifest(path, &entries).await {
                self.progress
                    .error(&format!("unable to write manifest to {path}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(entries)
        } else {
            Err(ReplicationError::Partial {
                completed: entries,
                failures,
                total,
            })
        }
    }
}
