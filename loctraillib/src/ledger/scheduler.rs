//! Background retries of failed operations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::sync::on_blocking;
use crate::analysis::CommitAnalyzer;
use crate::error::LoctrailError;
use crate::git::GitGateway;
use crate::store::Store;
use crate::Result;

use super::operation::{FailedOperation, OperationKind, RetryPolicy};

/// Result of one retry attempt.
#[derive(Debug)]
pub enum RetryOutcome {
    /// The work is done (now, or by an earlier pass)
    Resolved,
    StillFailing(LoctrailError),
}

/// Counts for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
}

/// Resumes the work a ledger entry describes.
pub struct RetryExecutor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn GitGateway>,
    analyzer: Arc<CommitAnalyzer>,
}

impl RetryExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn GitGateway>,
        analyzer: Arc<CommitAnalyzer>,
    ) -> Self {
        Self {
            store,
            gateway,
            analyzer,
        }
    }

    /// Attempt `op` once. Only store failures are returned as errors.
    pub async fn retry(&self, op: &FailedOperation) -> Result<RetryOutcome> {
        match op.kind {
            OperationKind::CommitAnalysis => self.retry_commit_analysis(op).await,
        }
    }

    async fn retry_commit_analysis(&self, op: &FailedOperation) -> Result<RetryOutcome> {
        let commit = op.commit_id();
        if self.store.snapshot_exists(op.repo_id, &commit).await? {
            debug!(commit = %commit.short(), "Snapshot already present");
            return Ok(RetryOutcome::Resolved);
        }

        let context = match op.commit_context() {
            Ok(context) => context,
            Err(e) => return Ok(RetryOutcome::StillFailing(e.into())),
        };
        let handle = match self.gateway.open(&context.working_copy) {
            Ok(handle) => handle,
            Err(e) => return Ok(RetryOutcome::StillFailing(e)),
        };

        let analyzer = Arc::clone(&self.analyzer);
        let repo_id = op.repo_id;
        let attempt = on_blocking(handle, move |h| {
            let info = h.commit_info(&commit)?;
            analyzer
                .resume(h, repo_id, &info, context.diff_stats)
                .map_err(|failure| failure.error)
        })
        .await;

        match attempt {
            Ok((_handle, Ok(snapshot))) => {
                self.store.upsert_snapshot(snapshot).await?;
                Ok(RetryOutcome::Resolved)
            }
            Ok((_, Err(e))) | Err(e) => Ok(RetryOutcome::StillFailing(e)),
        }
    }
}

/// Polls the ledger and retries entries whose cool-down has passed.
pub struct RetryScheduler {
    store: Arc<dyn Store>,
    executor: RetryExecutor,
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(store: Arc<dyn Store>, executor: RetryExecutor, policy: RetryPolicy) -> Self {
        Self {
            store,
            executor,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry every due entry once. Success deletes the entry; failure bumps
    /// its retry count.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RetrySummary> {
        let mut summary = RetrySummary::default();

        for mut op in self.store.list_retryable(self.policy.max_retries).await? {
            if !op.is_retry_due(now, &self.policy) {
                continue;
            }
            summary.attempted += 1;

            let outcome = match self.executor.retry(&op).await {
                Ok(outcome) => outcome,
                Err(e) => RetryOutcome::StillFailing(e),
            };
            match outcome {
                RetryOutcome::Resolved => {
                    self.store.delete_failure(op.id).await?;
                    summary.resolved += 1;
                    info!(
                        repo_id = %op.repo_id,
                        target = %op.target_id,
                        attempts = op.retry_count + 1,
                        "Retry succeeded"
                    );
                }
                RetryOutcome::StillFailing(e) => {
                    op.record_attempt(now, &e);
                    self.store.update_failure(&op).await?;
                    summary.still_failing += 1;
                    if op.is_exhausted(&self.policy) {
                        warn!(
                            repo_id = %op.repo_id,
                            target = %op.target_id,
                            error = %e,
                            "Retry ceiling reached"
                        );
                    } else {
                        debug!(
                            target = %op.target_id,
                            retry_count = op.retry_count,
                            error = %e,
                            "Retry failed"
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Run [`RetryScheduler::run_once`] every poll interval until `cancel`
    /// fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            // interval() panics on a zero period
            let period = self.policy.poll_interval.max(Duration::from_millis(1));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Retry scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.run_once(Utc::now()).await {
                            Ok(summary) if summary.attempted > 0 => {
                                info!(
                                    attempted = summary.attempted,
                                    resolved = summary.resolved,
                                    still_failing = summary.still_failing,
                                    "Retry pass finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Retry pass failed"),
                        }
                    }
                }
            }
        })
    }
}
