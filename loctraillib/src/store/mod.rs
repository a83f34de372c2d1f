//! Persistence contract and reference implementations.
//!
//! The engine only talks to a [`Store`]. [`MemoryStore`] keeps everything in
//! process; [`JsonFileStore`] persists the same state as one JSON document.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::ledger::FailedOperation;
use crate::model::{CommitId, CommitLineSnapshot, RepoId, TrackedRepository};
use crate::Result;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Storage for repositories, snapshots, and the failure ledger.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_repository(&self, repo: TrackedRepository) -> Result<()>;

    async fn get_repository(&self, id: RepoId) -> Result<Option<TrackedRepository>>;

    async fn update_repository(&self, repo: &TrackedRepository) -> Result<()>;

    async fn list_repositories(&self) -> Result<Vec<TrackedRepository>>;

    /// Remove a repository together with its snapshots and failures.
    async fn delete_repository(&self, id: RepoId) -> Result<()>;

    /// Insert or replace the snapshot for `(repo_id, commit_id)`.
    async fn upsert_snapshot(&self, snapshot: CommitLineSnapshot) -> Result<()>;

    async fn get_snapshot(
        &self,
        repo: RepoId,
        commit: &CommitId,
    ) -> Result<Option<CommitLineSnapshot>>;

    async fn snapshot_exists(&self, repo: RepoId, commit: &CommitId) -> Result<bool> {
        Ok(self.get_snapshot(repo, commit).await?.is_some())
    }

    /// Snapshots ordered by commit time.
    async fn list_snapshots(&self, repo: RepoId) -> Result<Vec<CommitLineSnapshot>>;

    async fn delete_snapshots(&self, repo: RepoId) -> Result<()>;

    async fn record_failure(&self, op: FailedOperation) -> Result<()>;

    /// All ledger entries, optionally for one repository, oldest first.
    async fn list_failures(&self, repo: Option<RepoId>) -> Result<Vec<FailedOperation>>;

    /// Entries below the retry ceiling, across all repositories.
    async fn list_retryable(&self, max_retries: u32) -> Result<Vec<FailedOperation>>;

    async fn update_failure(&self, op: &FailedOperation) -> Result<()>;

    async fn delete_failure(&self, id: Uuid) -> Result<()>;
}
