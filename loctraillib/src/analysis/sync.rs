//! Repository synchronization and the per-commit analysis pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialProvider, NoCredentials};
use crate::error::LoctrailError;
use crate::git::{GitGateway, RepoHandle};
use crate::ledger::{CommitAnalysisContext, FailedOperation};
use crate::model::{AnalysisMarker, CommitInfo, RepoId, TrackedRepository};
use crate::store::Store;
use crate::Result;

use super::commit::{CommitAnalyzer, CommitFailure};
use super::locks::RepoLocks;

/// Flags for one analysis pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyzeOptions {
    /// Recompute snapshots that recorded no change (0 added, 0 removed)
    pub force_reanalysis: bool,
    /// Drop every snapshot of the repository before the pass
    pub clear_existing_data: bool,
}

/// What happened to one commit during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Skipped,
    Processed,
    Failed,
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub total_commits: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ledger entries written or refreshed by this pass
    pub failures: Vec<FailedOperation>,
}

impl AnalysisReport {
    fn record(&mut self, outcome: CommitOutcome) {
        match outcome {
            CommitOutcome::Skipped => self.skipped += 1,
            CommitOutcome::Processed => self.processed += 1,
            CommitOutcome::Failed => self.failed += 1,
        }
    }
}

/// Keeps a repository's working copy current and its snapshots complete.
pub struct RepositorySynchronizer {
    store: Arc<dyn Store>,
    gateway: Arc<dyn GitGateway>,
    credentials: Arc<dyn CredentialProvider>,
    analyzer: Arc<CommitAnalyzer>,
    locks: RepoLocks,
    workspace_root: PathBuf,
}

impl RepositorySynchronizer {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn GitGateway>,
        analyzer: Arc<CommitAnalyzer>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            store,
            gateway,
            credentials: Arc::new(NoCredentials),
            analyzer,
            locks: RepoLocks::in_dir(workspace_root.join(".locks")),
            workspace_root,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Share a lock set with other synchronizers.
    pub fn with_locks(mut self, locks: RepoLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    /// Sync the working copy and snapshot every commit that needs it.
    ///
    /// Transport failures, store failures, and cancellation abort the pass.
    /// A commit that fails to analyze is written to the failure ledger and
    /// the pass moves on.
    pub async fn analyze_repository(
        &self,
        repo_id: RepoId,
        options: AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport> {
        let _guard = self.locks.try_acquire(repo_id)?;

        let mut repo = self
            .store
            .get_repository(repo_id)
            .await?
            .ok_or(LoctrailError::RepositoryNotFound(repo_id))?;

        info!(repo_id = %repo_id, repo = %repo.full_name(), ?options, "Starting analysis");

        if options.clear_existing_data {
            self.store.delete_snapshots(repo_id).await?;
            repo.last_analyzed = None;
            self.store.update_repository(&repo).await?;
            info!(repo_id = %repo_id, "Cleared existing snapshots");
        }

        if cancel.is_cancelled() {
            return Err(LoctrailError::Cancelled);
        }
        let path = self.sync_working_copy(&mut repo, cancel).await?;

        let handle = self.gateway.open(&path)?;
        let (mut handle, commits) = on_blocking(handle, |h| h.enumerate_commits()).await?;
        let commits = commits?;

        let mut ledger: HashMap<String, FailedOperation> = self
            .store
            .list_failures(Some(repo_id))
            .await?
            .into_iter()
            .map(|op| (op.target_id.clone(), op))
            .collect();

        let mut report = AnalysisReport {
            total_commits: commits.len(),
            ..Default::default()
        };

        for commit in &commits {
            if cancel.is_cancelled() {
                info!(
                    repo_id = %repo_id,
                    processed = report.processed,
                    "Analysis cancelled"
                );
                return Err(LoctrailError::Cancelled);
            }

            let (returned, outcome) = self
                .process_commit(handle, &repo, &path, commit, options, &mut ledger, &mut report)
                .await?;
            handle = returned;
            report.record(outcome);
        }
        drop(handle);

        if let Some(newest) = commits.last() {
            repo.last_analyzed = Some(AnalysisMarker {
                commit_id: newest.id.clone(),
                analyzed_at: Utc::now(),
            });
            self.store.update_repository(&repo).await?;
        }

        info!(
            repo_id = %repo_id,
            total = report.total_commits,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Analysis finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_commit(
        &self,
        handle: Box<dyn RepoHandle>,
        repo: &TrackedRepository,
        path: &Path,
        commit: &CommitInfo,
        options: AnalyzeOptions,
        ledger: &mut HashMap<String, FailedOperation>,
        report: &mut AnalysisReport,
    ) -> Result<(Box<dyn RepoHandle>, CommitOutcome)> {
        if let Some(existing) = self.store.get_snapshot(repo.id, &commit.id).await? {
            if !(options.force_reanalysis && existing.is_stale()) {
                debug!(commit = %commit.id.short(), "Snapshot exists, skipping");
                return Ok((handle, CommitOutcome::Skipped));
            }
            debug!(commit = %commit.id.short(), "Replacing stale snapshot");
        }

        let analyzer = Arc::clone(&self.analyzer);
        let repo_id = repo.id;
        let info = commit.clone();
        let (handle, result) = match on_blocking(handle, move |h| {
            analyzer.resume(h, repo_id, &info, None)
        })
        .await
        {
            Ok(pair) => pair,
            Err(error) => {
                // the handle went down with the task
                (
                    self.gateway.open(path)?,
                    Err(CommitFailure {
                        error,
                        diff_stats: None,
                    }),
                )
            }
        };

        match result {
            Ok(snapshot) => {
                self.store.upsert_snapshot(snapshot).await?;
                if let Some(stale) = ledger.remove(commit.id.as_str()) {
                    self.store.delete_failure(stale.id).await?;
                }
                Ok((handle, CommitOutcome::Processed))
            }
            Err(failure) => {
                warn!(
                    repo_id = %repo.id,
                    commit = %commit.id.short(),
                    error = %failure,
                    "Commit analysis failed"
                );
                let op = self
                    .record_failure(repo, path, commit, failure, ledger)
                    .await?;
                report.failures.push(op);
                Ok((handle, CommitOutcome::Failed))
            }
        }
    }

    /// Write a new ledger entry, or refresh the one this commit already has.
    async fn record_failure(
        &self,
        repo: &TrackedRepository,
        path: &Path,
        commit: &CommitInfo,
        failure: CommitFailure,
        ledger: &mut HashMap<String, FailedOperation>,
    ) -> Result<FailedOperation> {
        let context = CommitAnalysisContext {
            working_copy: path.to_path_buf(),
            diff_stats: failure.diff_stats,
        };

        match ledger.get_mut(commit.id.as_str()) {
            Some(existing) => {
                existing.error = failure.error.to_string();
                existing.failed_at = Utc::now();
                existing.context = serde_json::to_value(&context)?;
                self.store.update_failure(existing).await?;
                Ok(existing.clone())
            }
            None => {
                let op = FailedOperation::commit_analysis(repo.id, &commit.id, &failure, &context)?;
                self.store.record_failure(op.clone()).await?;
                ledger.insert(op.target_id.clone(), op.clone());
                Ok(op)
            }
        }
    }

    /// Clone when there is no usable working copy, pull otherwise.
    async fn sync_working_copy(
        &self,
        repo: &mut TrackedRepository,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let credential = self.credentials.credential_for(repo);
        let credential = credential.as_ref();

        if let Some(path) = repo.local_path.clone() {
            if self.gateway.is_working_copy(&path) {
                self.gateway
                    .pull(&repo.clone_url, &path, credential, cancel)
                    .await?;
                return Ok(path);
            }
            debug!(path = %path.display(), "Working copy missing, cloning again");
        }

        let dest = repo
            .local_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(repo.working_copy_dir_name()));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            // leftover of an interrupted clone
            tokio::fs::remove_dir_all(&dest).await?;
        }

        let path = self
            .gateway
            .clone_repository(&repo.clone_url, &dest, credential, cancel)
            .await?;
        repo.local_path = Some(path.clone());
        self.store.update_repository(repo).await?;
        Ok(path)
    }
}

/// Run `f` against the handle on the blocking pool and hand the handle back.
///
/// A panic inside `f` comes back as [`LoctrailError::Task`] and the handle
/// is lost with it.
pub(crate) async fn on_blocking<T, F>(
    handle: Box<dyn RepoHandle>,
    f: F,
) -> Result<(Box<dyn RepoHandle>, T)>
where
    T: Send + 'static,
    F: FnOnce(&dyn RepoHandle) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = f(handle.as_ref());
        (handle, out)
    })
    .await
    .map_err(|e| {
        if !e.is_panic() {
            return LoctrailError::Task(e.to_string());
        }
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown payload".to_string());
        LoctrailError::Task(format!("panicked: {}", message))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationPolicy;
    use crate::model::DiffStats;
    use crate::store::MemoryStore;
    use crate::testing::FakeGit;
    use tempfile::TempDir;

    struct Fixture {
        git: FakeGit,
        store: Arc<MemoryStore>,
        sync: RepositorySynchronizer,
        repo: TrackedRepository,
        workspace: TempDir,
    }

    async fn fixture() -> Fixture {
        let git = FakeGit::new();
        let store = Arc::new(MemoryStore::new());
        let workspace = TempDir::new().unwrap();
        let analyzer =
            Arc::new(CommitAnalyzer::from_policy(&ClassificationPolicy::default()).unwrap());
        let sync = RepositorySynchronizer::new(
            store.clone(),
            Arc::new(git.clone()),
            analyzer,
            workspace.path(),
        );
        let repo = TrackedRepository::new("acme", "widgets", "https://example.com/acme/widgets.git");
        store.insert_repository(repo.clone()).await.unwrap();
        Fixture {
            git,
            store,
            sync,
            repo,
            workspace,
        }
    }

    fn three_commits(git: &FakeGit) -> Vec<crate::model::CommitId> {
        vec![
            git.commit("c1", &[("a.rs", "fn a() {}\n")], DiffStats::new(1, 0)),
            git.commit(
                "c2",
                &[("a.rs", "fn a() {}\n"), ("b.rs", "fn b() {}\n")],
                DiffStats::new(1, 0),
            ),
            git.commit(
                "c3",
                &[("a.rs", "fn a() {}\n"), ("b.rs", "fn b() {}\nfn c() {}\n")],
                DiffStats::new(1, 0),
            ),
        ]
    }

    async fn run(f: &Fixture, options: AnalyzeOptions) -> Result<AnalysisReport> {
        f.sync
            .analyze_repository(f.repo.id, options, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_first_pass_processes_every_commit() {
        let f = fixture().await;
        let ids = three_commits(&f.git);

        let report = run(&f, AnalyzeOptions::default()).await.unwrap();

        assert_eq!(report.total_commits, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 0);
        let snapshots = f.store.list_snapshots(f.repo.id).await.unwrap();
        let totals: Vec<u64> = snapshots.iter().map(|s| s.total_lines).collect();
        assert_eq!(totals, vec![1, 2, 3]);

        let repo = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        assert_eq!(repo.last_analyzed.unwrap().commit_id, ids[2]);
        assert!(repo.local_path.is_some());
        assert_eq!(f.git.clones(), 1);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let f = fixture().await;
        three_commits(&f.git);

        run(&f, AnalyzeOptions::default()).await.unwrap();
        let before = f.store.list_snapshots(f.repo.id).await.unwrap();
        let report = run(&f, AnalyzeOptions::default()).await.unwrap();

        assert_eq!(report.processed, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap(), before);
        assert_eq!(f.git.clones(), 1);
        assert_eq!(f.git.pulled_urls(), vec![f.repo.clone_url.clone()]);
    }

    #[tokio::test]
    async fn test_new_commits_are_picked_up_incrementally() {
        let f = fixture().await;
        three_commits(&f.git);
        run(&f, AnalyzeOptions::default()).await.unwrap();

        f.git.commit("c4", &[("a.rs", "fn a() {}\n")], DiffStats::new(0, 2));
        let report = run(&f, AnalyzeOptions::default()).await.unwrap();

        assert_eq!(report.total_commits, 4);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_force_replaces_only_stale_snapshots() {
        let f = fixture().await;
        let ids = three_commits(&f.git);
        run(&f, AnalyzeOptions::default()).await.unwrap();

        let mut stale = f.store.get_snapshot(f.repo.id, &ids[1]).await.unwrap().unwrap();
        stale.lines_added = 0;
        stale.lines_removed = 0;
        f.store.upsert_snapshot(stale).await.unwrap();

        let report = run(
            &f,
            AnalyzeOptions {
                force_reanalysis: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 2);
        let fixed = f.store.get_snapshot(f.repo.id, &ids[1]).await.unwrap().unwrap();
        assert_eq!(fixed.diff(), DiffStats::new(1, 0));
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_snapshot_kept_without_force() {
        let f = fixture().await;
        let ids = three_commits(&f.git);
        run(&f, AnalyzeOptions::default()).await.unwrap();

        let mut stale = f.store.get_snapshot(f.repo.id, &ids[1]).await.unwrap().unwrap();
        stale.lines_added = 0;
        f.store.upsert_snapshot(stale).await.unwrap();

        let report = run(&f, AnalyzeOptions::default()).await.unwrap();
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn test_failed_commit_is_contained() {
        let f = fixture().await;
        let ids = three_commits(&f.git);
        f.git.break_blobs(&ids[1]);

        let report = run(&f, AnalyzeOptions::default()).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap().len(), 2);

        let failures = f.store.list_failures(Some(f.repo.id)).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].commit_id(), ids[1]);
        assert_eq!(failures[0].retry_count, 0);
        let context = failures[0].commit_context().unwrap();
        assert_eq!(context.diff_stats, Some(DiffStats::new(1, 0)));
        assert_eq!(report.failures, failures);
    }

    #[tokio::test]
    async fn test_repeat_failure_refreshes_ledger_entry() {
        let f = fixture().await;
        let ids = three_commits(&f.git);
        f.git.break_blobs(&ids[1]);

        run(&f, AnalyzeOptions::default()).await.unwrap();
        run(&f, AnalyzeOptions::default()).await.unwrap();
        assert_eq!(f.store.list_failures(Some(f.repo.id)).await.unwrap().len(), 1);

        f.git.repair(&ids[1]);
        let report = run(&f, AnalyzeOptions::default()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(f.store.list_failures(Some(f.repo.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_commit_is_contained() {
        let f = fixture().await;
        let ids = three_commits(&f.git);
        f.git.panic_on(&ids[1]);

        let report = run(&f, AnalyzeOptions::default()).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        let snapshots = f.store.list_snapshots(f.repo.id).await.unwrap();
        let analyzed: Vec<_> = snapshots.iter().map(|s| s.commit_id.clone()).collect();
        assert_eq!(analyzed, vec![ids[0].clone(), ids[2].clone()]);

        let failures = f.store.list_failures(Some(f.repo.id)).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].commit_id(), ids[1]);
        assert!(failures[0].error.contains("panicked"));
        assert!(failures[0].error.contains("object decoder crashed"));
        let repo = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        assert_eq!(repo.last_analyzed.unwrap().commit_id, ids[2]);
    }

    #[tokio::test]
    async fn test_clear_and_reanalyze() {
        let f = fixture().await;
        three_commits(&f.git);
        run(&f, AnalyzeOptions::default()).await.unwrap();

        let report = run(
            &f,
            AnalyzeOptions {
                clear_existing_data: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_clear_happens_before_sync() {
        let f = fixture().await;
        three_commits(&f.git);
        run(&f, AnalyzeOptions::default()).await.unwrap();
        f.git.set_transport_down(true);

        let err = run(
            &f,
            AnalyzeOptions {
                clear_existing_data: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        assert!(err.is_transport());
        assert!(f.store.list_snapshots(f.repo.id).await.unwrap().is_empty());
        let repo = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        assert!(repo.last_analyzed.is_none());
    }

    #[tokio::test]
    async fn test_same_named_repositories_get_separate_working_copies() {
        let f = fixture().await;
        three_commits(&f.git);
        let twin = TrackedRepository::new("acme", "widgets", "https://mirror.example.com/acme/widgets.git");
        f.store.insert_repository(twin.clone()).await.unwrap();

        run(&f, AnalyzeOptions::default()).await.unwrap();
        f.sync
            .analyze_repository(twin.id, AnalyzeOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let first = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        let second = f.store.get_repository(twin.id).await.unwrap().unwrap();
        assert_ne!(first.local_path, second.local_path);
        assert_eq!(f.git.clones(), 2);
    }

    #[tokio::test]
    async fn test_second_process_is_locked_out() {
        let f = fixture().await;
        three_commits(&f.git);
        // another synchronizer over the same workspace, as a second process would build
        let other = RepoLocks::in_dir(f.workspace.path().join(".locks"));

        let _held = other.try_acquire(f.repo.id).unwrap();
        let err = run(&f, AnalyzeOptions::default()).await.unwrap_err();

        assert!(matches!(err, LoctrailError::AnalysisInProgress(id) if id == f.repo.id));
        assert!(!f.sync.locks().is_held(f.repo.id));
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_commits() {
        let f = fixture().await;
        three_commits(&f.git);
        let cancel = CancellationToken::new();
        f.git.cancel_after_diffs(2, cancel.clone());

        let err = f
            .sync
            .analyze_repository(f.repo.id, AnalyzeOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LoctrailError::Cancelled));
        assert_eq!(f.store.list_snapshots(f.repo.id).await.unwrap().len(), 2);
        let repo = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        assert!(repo.last_analyzed.is_none());
        assert!(!f.sync.locks().is_held(f.repo.id));
    }

    #[tokio::test]
    async fn test_concurrent_run_for_same_repository_is_rejected() {
        let f = fixture().await;
        three_commits(&f.git);

        let _held = f.sync.locks().try_acquire(f.repo.id).unwrap();
        let err = run(&f, AnalyzeOptions::default()).await.unwrap_err();

        assert!(matches!(err, LoctrailError::AnalysisInProgress(id) if id == f.repo.id));
        assert!(f.store.list_snapshots(f.repo.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_aborts_pass() {
        let f = fixture().await;
        three_commits(&f.git);
        f.git.set_transport_down(true);

        let err = run(&f, AnalyzeOptions::default()).await.unwrap_err();

        assert!(err.is_transport());
        assert!(f.store.list_snapshots(f.repo.id).await.unwrap().is_empty());
        assert!(f.store.list_failures(None).await.unwrap().is_empty());
        assert!(!f.sync.locks().is_held(f.repo.id));
    }

    #[tokio::test]
    async fn test_unknown_repository() {
        let f = fixture().await;
        let err = f
            .sync
            .analyze_repository(RepoId::new(), AnalyzeOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoctrailError::RepositoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_history() {
        let f = fixture().await;
        let report = run(&f, AnalyzeOptions::default()).await.unwrap();
        assert_eq!(report.total_commits, 0);
        let repo = f.store.get_repository(f.repo.id).await.unwrap().unwrap();
        assert!(repo.last_analyzed.is_none());
    }
}
