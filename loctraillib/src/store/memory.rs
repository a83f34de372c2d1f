//! In-process store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LoctrailError;
use crate::ledger::FailedOperation;
use crate::model::{CommitId, CommitLineSnapshot, RepoId, TrackedRepository};
use crate::Result;

use super::Store;

/// Everything a store holds. Shared with [`super::JsonFileStore`], which
/// serializes it as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    repositories: BTreeMap<RepoId, TrackedRepository>,
    #[serde(default)]
    snapshots: BTreeMap<RepoId, BTreeMap<CommitId, CommitLineSnapshot>>,
    #[serde(default)]
    failures: Vec<FailedOperation>,
}

impl StoreState {
    pub(crate) fn insert_repository(&mut self, repo: TrackedRepository) {
        self.repositories.insert(repo.id, repo);
    }

    pub(crate) fn get_repository(&self, id: RepoId) -> Option<TrackedRepository> {
        self.repositories.get(&id).cloned()
    }

    pub(crate) fn update_repository(&mut self, repo: &TrackedRepository) -> Result<()> {
        match self.repositories.get_mut(&repo.id) {
            Some(existing) => {
                *existing = repo.clone();
                Ok(())
            }
            None => Err(LoctrailError::RepositoryNotFound(repo.id)),
        }
    }

    pub(crate) fn list_repositories(&self) -> Vec<TrackedRepository> {
        let mut repos: Vec<_> = self.repositories.values().cloned().collect();
        repos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        repos
    }

    pub(crate) fn delete_repository(&mut self, id: RepoId) {
        self.repositories.remove(&id);
        self.snapshots.remove(&id);
        self.failures.retain(|op| op.repo_id != id);
    }

    pub(crate) fn upsert_snapshot(&mut self, snapshot: CommitLineSnapshot) {
        self.snapshots
            .entry(snapshot.repo_id)
            .or_default()
            .insert(snapshot.commit_id.clone(), snapshot);
    }

    pub(crate) fn get_snapshot(&self, repo: RepoId, commit: &CommitId) -> Option<CommitLineSnapshot> {
        self.snapshots
            .get(&repo)
            .and_then(|by_commit| by_commit.get(commit))
            .cloned()
    }

    pub(crate) fn list_snapshots(&self, repo: RepoId) -> Vec<CommitLineSnapshot> {
        let mut snapshots: Vec<_> = self
            .snapshots
            .get(&repo)
            .map(|by_commit| by_commit.values().cloned().collect())
            .unwrap_or_default();
        snapshots.sort_by(|a, b| {
            a.committed_at
                .cmp(&b.committed_at)
                .then_with(|| a.commit_id.cmp(&b.commit_id))
        });
        snapshots
    }

    pub(crate) fn delete_snapshots(&mut self, repo: RepoId) {
        self.snapshots.remove(&repo);
    }

    pub(crate) fn record_failure(&mut self, op: FailedOperation) {
        self.failures.push(op);
    }

    pub(crate) fn list_failures(&self, repo: Option<RepoId>) -> Vec<FailedOperation> {
        self.failures
            .iter()
            .filter(|op| repo.map_or(true, |id| op.repo_id == id))
            .cloned()
            .collect()
    }

    pub(crate) fn list_retryable(&self, max_retries: u32) -> Vec<FailedOperation> {
        self.failures
            .iter()
            .filter(|op| op.retry_count < max_retries)
            .cloned()
            .collect()
    }

    pub(crate) fn update_failure(&mut self, op: &FailedOperation) -> Result<()> {
        match self.failures.iter_mut().find(|existing| existing.id == op.id) {
            Some(existing) => {
                *existing = op.clone();
                Ok(())
            }
            None => Err(LoctrailError::Store(format!(
                "failed operation {} not found",
                op.id
            ))),
        }
    }

    pub(crate) fn delete_failure(&mut self, id: Uuid) {
        self.failures.retain(|op| op.id != id);
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| LoctrailError::Store("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_repository(&self, repo: TrackedRepository) -> Result<()> {
        self.state()?.insert_repository(repo);
        Ok(())
    }

    async fn get_repository(&self, id: RepoId) -> Result<Option<TrackedRepository>> {
        Ok(self.state()?.get_repository(id))
    }

    async fn update_repository(&self, repo: &TrackedRepository) -> Result<()> {
        self.state()?.update_repository(repo)
    }

    async fn list_repositories(&self) -> Result<Vec<TrackedRepository>> {
        Ok(self.state()?.list_repositories())
    }

    async fn delete_repository(&self, id: RepoId) -> Result<()> {
        self.state()?.delete_repository(id);
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: CommitLineSnapshot) -> Result<()> {
        self.state()?.upsert_snapshot(snapshot);
        Ok(())
    }

    async fn get_snapshot(
        &self,
        repo: RepoId,
        commit: &CommitId,
    ) -> Result<Option<CommitLineSnapshot>> {
        Ok(self.state()?.get_snapshot(repo, commit))
    }

    async fn list_snapshots(&self, repo: RepoId) -> Result<Vec<CommitLineSnapshot>> {
        Ok(self.state()?.list_snapshots(repo))
    }

    async fn delete_snapshots(&self, repo: RepoId) -> Result<()> {
        self.state()?.delete_snapshots(repo);
        Ok(())
    }

    async fn record_failure(&self, op: FailedOperation) -> Result<()> {
        self.state()?.record_failure(op);
        Ok(())
    }

    async fn list_failures(&self, repo: Option<RepoId>) -> Result<Vec<FailedOperation>> {
        Ok(self.state()?.list_failures(repo))
    }

    async fn list_retryable(&self, max_retries: u32) -> Result<Vec<FailedOperation>> {
        Ok(self.state()?.list_retryable(max_retries))
    }

    async fn update_failure(&self, op: &FailedOperation) -> Result<()> {
        self.state()?.update_failure(op)
    }

    async fn delete_failure(&self, id: Uuid) -> Result<()> {
        self.state()?.delete_failure(id);
        Ok(())
    }
}
