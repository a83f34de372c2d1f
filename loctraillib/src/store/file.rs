//! Store persisted as a single JSON document.
//!
//! The file is the only copy of the state. Every read loads it under a
//! shared lock; every mutation loads it under an exclusive lock, applies the
//! change, and writes it back before releasing, so several processes (an
//! `analyze` run and a long-lived retry watcher, say) can share one store
//! without overwriting each other. The new state is written to a sibling
//! temp file and renamed over the old one, so a crash leaves either the
//! previous or the next state on disk, never a torn file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::LoctrailError;
use crate::ledger::FailedOperation;
use crate::lockfile::LockFile;
use crate::model::{CommitId, CommitLineSnapshot, RepoId, TrackedRepository};
use crate::Result;

use super::memory::StoreState;
use super::Store;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    /// An unreadable document is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        store.read(|_| ()).await?;
        debug!(path = %store.path.display(), "opened store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> T + Send + 'static,
    {
        let path = self.path.clone();
        blocking(move || {
            let _lock = LockFile::shared(&lock_path(&path))?;
            Ok(f(&load(&path)?))
        })
        .await
    }

    /// Apply `f` to the current on-disk state and persist the result. Nothing
    /// is written when `f` fails.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        blocking(move || {
            let _lock = LockFile::exclusive(&lock_path(&path))?;
            let mut state = load(&path)?;
            let out = f(&mut state)?;
            persist(&path, &state)?;
            Ok(out)
        })
        .await
    }
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("json.lock")
}

fn load(path: &Path) -> Result<StoreState> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StoreState::default()),
        Err(err) => Err(err.into()),
    }
}

fn persist(path: &Path, state: &StoreState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LoctrailError::Task(e.to_string()))?
}

#[async_trait]
impl Store for JsonFileStore {
    async fn insert_repository(&self, repo: TrackedRepository) -> Result<()> {
        self.mutate(move |s| {
            s.insert_repository(repo);
            Ok(())
        })
        .await
    }

    async fn get_repository(&self, id: RepoId) -> Result<Option<TrackedRepository>> {
        self.read(move |s| s.get_repository(id)).await
    }

    async fn update_repository(&self, repo: &TrackedRepository) -> Result<()> {
        let repo = repo.clone();
        self.mutate(move |s| s.update_repository(&repo)).await
    }

    async fn list_repositories(&self) -> Result<Vec<TrackedRepository>> {
        self.read(|s| s.list_repositories()).await
    }

    async fn delete_repository(&self, id: RepoId) -> Result<()> {
        self.mutate(move |s| {
            s.delete_repository(id);
            Ok(())
        })
        .await
    }

    async fn upsert_snapshot(&self, snapshot: CommitLineSnapshot) -> Result<()> {
        self.mutate(move |s| {
            s.upsert_snapshot(snapshot);
            Ok(())
        })
        .await
    }

    async fn get_snapshot(
        &self,
        repo: RepoId,
        commit: &CommitId,
    ) -> Result<Option<CommitLineSnapshot>> {
        let commit = commit.clone();
        self.read(move |s| s.get_snapshot(repo, &commit)).await
    }

    async fn list_snapshots(&self, repo: RepoId) -> Result<Vec<CommitLineSnapshot>> {
        self.read(move |s| s.list_snapshots(repo)).await
    }

    async fn delete_snapshots(&self, repo: RepoId) -> Result<()> {
        self.mutate(move |s| {
            s.delete_snapshots(repo);
            Ok(())
        })
        .await
    }

    async fn record_failure(&self, op: FailedOperation) -> Result<()> {
        self.mutate(move |s| {
            s.record_failure(op);
            Ok(())
        })
        .await
    }

    async fn list_failures(&self, repo: Option<RepoId>) -> Result<Vec<FailedOperation>> {
        self.read(move |s| s.list_failures(repo)).await
    }

    async fn list_retryable(&self, max_retries: u32) -> Result<Vec<FailedOperation>> {
        self.read(move |s| s.list_retryable(max_retries)).await
    }

    async fn update_failure(&self, op: &FailedOperation) -> Result<()> {
        let op = op.clone();
        self.mutate(move |s| s.update_failure(&op)).await
    }

    async fn delete_failure(&self, id: Uuid) -> Result<()> {
        self.mutate(move |s| {
            s.delete_failure(id);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitInfo, DiffStats};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn snapshot(repo: RepoId, id: &str) -> CommitLineSnapshot {
        let commit = CommitInfo {
            id: CommitId::new(id),
            committed_at: Utc::now(),
            parent_ids: Vec::new(),
        };
        let mut by_category = BTreeMap::new();
        by_category.insert("rs".to_string(), 12);
        CommitLineSnapshot::new(repo, &commit, DiffStats::new(12, 0), by_category)
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).await.unwrap();
        assert!(store.list_repositories().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let repo = TrackedRepository::new("acme", "widgets", "https://example.com/w.git");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.insert_repository(repo.clone()).await.unwrap();
            store.upsert_snapshot(snapshot(repo.id, "abc")).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_repository(repo.id).await.unwrap(), Some(repo.clone()));
        let snapshots = reopened.list_snapshots(repo.id).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_lines, 12);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).await.unwrap();
        let repo = TrackedRepository::new("acme", "widgets", "https://example.com/w.git");

        assert!(store.update_repository(&repo).await.is_err());
        assert!(store.list_repositories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_handles_on_one_file_see_each_others_writes() {
        use crate::ledger::CommitAnalysisContext;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let repo = TrackedRepository::new("acme", "widgets", "https://example.com/w.git");
        let op = FailedOperation::commit_analysis(
            repo.id,
            &CommitId::new("c2"),
            "boom",
            &CommitAnalysisContext {
                working_copy: dir.path().join("wc"),
                diff_stats: None,
            },
        )
        .unwrap();

        let watcher = JsonFileStore::open(&path).await.unwrap();
        let analyzer = JsonFileStore::open(&path).await.unwrap();
        analyzer.insert_repository(repo.clone()).await.unwrap();
        analyzer.record_failure(op.clone()).await.unwrap();

        // written after the watcher opened the file
        analyzer.upsert_snapshot(snapshot(repo.id, "c3")).await.unwrap();
        assert_eq!(watcher.list_retryable(3).await.unwrap(), vec![op.clone()]);

        watcher.delete_failure(op.id).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_snapshots(repo.id).await.unwrap().len(), 1);
        assert!(reopened.list_failures(None).await.unwrap().is_empty());
        assert!(analyzer.list_failures(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_serialized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let repo = TrackedRepository::new("acme", "widgets", "https://example.com/w.git");
        JsonFileStore::open(&path)
            .await
            .unwrap()
            .insert_repository(repo.clone())
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = JsonFileStore::open(&path).await.unwrap();
            let repo_id = repo.id;
            tasks.push(tokio::spawn(async move {
                store
                    .upsert_snapshot(snapshot(repo_id, &format!("c{}", i)))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let store = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(store.list_snapshots(repo.id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}
