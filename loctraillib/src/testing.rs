//! Scripted in-memory git gateway for orchestration tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::credentials::Credential;
use crate::error::LoctrailError;
use crate::git::{EntryKind, GitGateway, RepoHandle, TreeEntry, WalkAction};
use crate::model::{CommitId, CommitInfo, DiffStats};
use crate::Result;

#[derive(Default)]
struct Scripted {
    commits: Vec<CommitInfo>,
    files: HashMap<CommitId, BTreeMap<String, Vec<u8>>>,
    diffs: HashMap<CommitId, DiffStats>,
    broken_blobs: HashSet<CommitId>,
    panicking: HashSet<CommitId>,
    transport_down: bool,
    working_copies: HashSet<PathBuf>,
    clones: usize,
    pulled_urls: Vec<String>,
    diffs_computed: usize,
    diff_limits: Vec<u64>,
    cancel_after_diffs: Option<(usize, CancellationToken)>,
}

/// A fake repository whose history tests append to. Clones share state, so
/// a test can keep one copy while the engine drives another.
#[derive(Clone, Default)]
pub(crate) struct FakeGit {
    state: Arc<Mutex<Scripted>>,
}

impl FakeGit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Scripted> {
        self.state.lock().unwrap()
    }

    /// Append a commit on top of the previous one. `files` is the full tree.
    pub(crate) fn commit(&self, id: &str, files: &[(&str, &str)], diff: DiffStats) -> CommitId {
        let mut state = self.state();
        let id = CommitId::new(id);
        let parent_ids = state.commits.last().map(|c| vec![c.id.clone()]).unwrap_or_default();
        let secs = 1_700_000_000 + state.commits.len() as i64 * 60;
        state.commits.push(CommitInfo {
            id: id.clone(),
            committed_at: Utc.timestamp_opt(secs, 0).unwrap(),
            parent_ids,
        });
        state.files.insert(
            id.clone(),
            files
                .iter()
                .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
                .collect(),
        );
        state.diffs.insert(id.clone(), diff);
        id
    }

    /// Make every blob read in `commit` fail until [`FakeGit::repair`].
    pub(crate) fn break_blobs(&self, commit: &CommitId) {
        self.state().broken_blobs.insert(commit.clone());
    }

    pub(crate) fn repair(&self, commit: &CommitId) {
        let mut state = self.state();
        state.broken_blobs.remove(commit);
        state.panicking.remove(commit);
    }

    /// Make every blob read in `commit` panic until [`FakeGit::repair`].
    pub(crate) fn panic_on(&self, commit: &CommitId) {
        self.state().panicking.insert(commit.clone());
    }

    pub(crate) fn set_transport_down(&self, down: bool) {
        self.state().transport_down = down;
    }

    /// Cancel `token` once `n` diffs have been computed.
    pub(crate) fn cancel_after_diffs(&self, n: usize, token: CancellationToken) {
        self.state().cancel_after_diffs = Some((n, token));
    }

    pub(crate) fn clones(&self) -> usize {
        self.state().clones
    }

    pub(crate) fn pulls(&self) -> usize {
        self.state().pulled_urls.len()
    }

    /// URLs passed to `pull`, in call order.
    pub(crate) fn pulled_urls(&self) -> Vec<String> {
        self.state().pulled_urls.clone()
    }

    /// `max_blob_bytes` of the most recent diff.
    pub(crate) fn last_diff_limit(&self) -> Option<u64> {
        self.state().diff_limits.last().copied()
    }

    pub(crate) fn diffs_computed(&self) -> usize {
        self.state().diffs_computed
    }

    fn transport(&self, url: &str) -> Result<()> {
        if self.state().transport_down {
            return Err(LoctrailError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GitGateway for FakeGit {
    async fn clone_repository(
        &self,
        url: &str,
        dest: &Path,
        _credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(LoctrailError::Cancelled);
        }
        self.transport(url)?;
        let mut state = self.state();
        state.clones += 1;
        state.working_copies.insert(dest.to_path_buf());
        Ok(dest.to_path_buf())
    }

    async fn pull(
        &self,
        url: &str,
        _path: &Path,
        _credential: Option<&Credential>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.transport(url)?;
        self.state().pulled_urls.push(url.to_string());
        Ok(())
    }

    fn is_working_copy(&self, path: &Path) -> bool {
        self.state().working_copies.contains(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn RepoHandle>> {
        if !self.is_working_copy(path) {
            return Err(LoctrailError::WorkingCopy {
                path: path.to_path_buf(),
                message: "not cloned".to_string(),
            });
        }
        Ok(Box::new(FakeHandle {
            git: self.clone(),
            path: path.to_path_buf(),
        }))
    }
}

pub(crate) struct FakeHandle {
    git: FakeGit,
    path: PathBuf,
}

impl FakeHandle {
    /// A handle that does not require a prior clone.
    pub(crate) fn on(git: &FakeGit) -> Self {
        Self {
            git: git.clone(),
            path: PathBuf::from("/fake"),
        }
    }

    fn tree(&self, commit: &CommitId) -> Result<BTreeMap<String, Vec<u8>>> {
        self.git
            .state()
            .files
            .get(commit)
            .cloned()
            .ok_or_else(|| LoctrailError::CommitNotFound(commit.to_string()))
    }
}

impl RepoHandle for FakeHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn enumerate_commits(&self) -> Result<Vec<CommitInfo>> {
        Ok(self.git.state().commits.clone())
    }

    fn commit_info(&self, commit: &CommitId) -> Result<CommitInfo> {
        self.git
            .state()
            .commits
            .iter()
            .find(|c| c.id == *commit)
            .cloned()
            .ok_or_else(|| LoctrailError::CommitNotFound(commit.to_string()))
    }

    fn diff_stats(&self, commit: &CommitId, max_blob_bytes: u64) -> Result<DiffStats> {
        let mut state = self.git.state();
        state.diff_limits.push(max_blob_bytes);
        let diff = state
            .diffs
            .get(commit)
            .copied()
            .ok_or_else(|| LoctrailError::CommitNotFound(commit.to_string()))?;
        state.diffs_computed += 1;
        if let Some((n, token)) = &state.cancel_after_diffs {
            if state.diffs_computed >= *n {
                token.cancel();
            }
        }
        Ok(diff)
    }

    fn walk_tree(
        &self,
        commit: &CommitId,
        visit: &mut dyn FnMut(&TreeEntry<'_>) -> WalkAction,
    ) -> Result<()> {
        let tree = self.tree(commit)?;
        let mut seen = HashSet::new();
        let mut pruned: Vec<String> = Vec::new();

        'files: for path in tree.keys() {
            let parts: Vec<&str> = path.split('/').collect();
            for depth in 1..parts.len() {
                let dir = parts[..depth].join("/");
                if pruned.contains(&dir) {
                    continue 'files;
                }
                if seen.insert(dir.clone()) {
                    let action = visit(&TreeEntry {
                        path: &dir,
                        name: parts[depth - 1],
                        kind: EntryKind::Directory,
                    });
                    if action == WalkAction::Prune {
                        pruned.push(dir);
                        continue 'files;
                    }
                }
            }
            visit(&TreeEntry {
                path,
                name: parts[parts.len() - 1],
                kind: EntryKind::File,
            });
        }
        Ok(())
    }

    fn read_blob(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>> {
        // checked before panicking so the state lock is not poisoned
        let panics = self.git.state().panicking.contains(commit);
        if panics {
            panic!("object decoder crashed on {}", path);
        }
        if self.git.state().broken_blobs.contains(commit) {
            return Err(LoctrailError::Git(format!("corrupt object for {}", path)));
        }
        self.tree(commit)?
            .remove(path)
            .ok_or_else(|| LoctrailError::BlobNotFound {
                commit: commit.to_string(),
                path: path.to_string(),
            })
    }
}
