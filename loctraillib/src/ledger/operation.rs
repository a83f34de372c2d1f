//! Failed-operation records and their retry state machine.
//!
//! ```text
//! Recorded ──(cool-down elapsed)──▶ RetryPending ──▶ in flight ─┬─▶ resolved (deleted)
//!     ▲                                                         │
//!     └──────────────(retry_count += 1)─────────────────────────┘
//!                         retry_count ≥ max ──▶ Exhausted
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CommitId, DiffStats, RepoId};
use crate::Result;

/// Kind of work a ledger entry can resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CommitAnalysis,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::CommitAnalysis => f.write_str("commit_analysis"),
        }
    }
}

/// Retry ceiling and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Minimum time between two attempts on the same entry
    #[serde(with = "seconds")]
    pub cool_down: Duration,
    /// How often the scheduler polls the ledger
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cool_down: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(5 * 60),
        }
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Where an entry sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// Waiting for the cool-down to pass
    Recorded,
    /// Eligible for the next scheduler pass
    RetryPending,
    /// Reached the retry ceiling; needs manual intervention
    Exhausted,
}

/// What a commit-analysis retry needs to resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAnalysisContext {
    pub working_copy: PathBuf,
    /// Diff stats computed before the failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_stats: Option<DiffStats>,
}

/// A dead-letter entry for one failed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub id: Uuid,
    pub repo_id: RepoId,
    pub kind: OperationKind,
    /// Commit id for commit analysis
    pub target_id: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub context: serde_json::Value,
}

impl FailedOperation {
    /// Record a failed commit analysis. Fails when the context cannot be
    /// encoded, e.g. a working copy path that is not valid UTF-8.
    pub fn commit_analysis(
        repo_id: RepoId,
        commit: &CommitId,
        error: impl fmt::Display,
        context: &CommitAnalysisContext,
    ) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            repo_id,
            kind: OperationKind::CommitAnalysis,
            target_id: commit.to_string(),
            error: error.to_string(),
            failed_at: Utc::now(),
            retry_count: 0,
            last_retry_at: None,
            context: serde_json::to_value(context)?,
        })
    }

    pub fn commit_id(&self) -> CommitId {
        CommitId::new(self.target_id.clone())
    }

    /// Decode the context payload of a commit-analysis entry.
    pub fn commit_context(&self) -> serde_json::Result<CommitAnalysisContext> {
        serde_json::from_value(self.context.clone())
    }

    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.retry_count >= policy.max_retries
    }

    /// Below the ceiling and past the cool-down since the last attempt.
    pub fn is_retry_due(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        if self.is_exhausted(policy) {
            return false;
        }
        match self.last_retry_at {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= policy.cool_down)
                .unwrap_or(false),
        }
    }

    pub fn state(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> LedgerState {
        if self.is_exhausted(policy) {
            LedgerState::Exhausted
        } else if self.is_retry_due(now, policy) {
            LedgerState::RetryPending
        } else {
            LedgerState::Recorded
        }
    }

    /// Book a failed retry attempt.
    pub fn record_attempt(&mut self, now: DateTime<Utc>, error: impl fmt::Display) {
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.error = error.to_string();
    }
}
