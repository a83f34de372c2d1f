//! Git access: the contract the engine consumes, and a `gix` implementation.
//!
//! Network operations (clone, pull) are async and cancellable. Object access
//! goes through a [`RepoHandle`], a blocking, single-owner handle opened once
//! per analysis pass and dropped when the pass ends.

pub mod command;
pub mod gix_repo;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::credentials::Credential;
use crate::model::{CommitId, CommitInfo, DiffStats};
use crate::Result;

pub use gix_repo::{GixGateway, GixHandle};

/// What the tree walker should do with a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Descend,
    Prune,
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// An entry seen while walking a commit's tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeEntry<'a> {
    /// Repository-relative path with `/` separators
    pub path: &'a str,
    /// Last path component
    pub name: &'a str,
    pub kind: EntryKind,
}

/// Blocking access to one repository's objects.
pub trait RepoHandle: Send {
    /// Working copy this handle was opened on.
    fn path(&self) -> &Path;

    /// Every commit reachable from HEAD, oldest first.
    fn enumerate_commits(&self) -> Result<Vec<CommitInfo>>;

    /// Metadata of a single commit.
    fn commit_info(&self, commit: &CommitId) -> Result<CommitInfo>;

    /// Line insertions/removals against the first parent (or the empty tree).
    /// A blob pair where either side exceeds `max_blob_bytes` contributes
    /// nothing.
    fn diff_stats(&self, commit: &CommitId, max_blob_bytes: u64) -> Result<DiffStats>;

    /// Walk the commit's tree. Returning [`WalkAction::Prune`] for a
    /// directory skips everything below it; the return value is ignored for
    /// files.
    fn walk_tree(
        &self,
        commit: &CommitId,
        visit: &mut dyn FnMut(&TreeEntry<'_>) -> WalkAction,
    ) -> Result<()>;

    /// Contents of `path` as of `commit`.
    fn read_blob(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>>;

    /// Contents of `path`, or `None` when the blob is larger than
    /// `max_bytes`. Implementations should check the size before loading.
    fn read_blob_within(
        &self,
        commit: &CommitId,
        path: &str,
        max_bytes: u64,
    ) -> Result<Option<Vec<u8>>> {
        let data = self.read_blob(commit, path)?;
        Ok((data.len() as u64 <= max_bytes).then_some(data))
    }
}

/// Clone, refresh, and open repositories.
#[async_trait]
pub trait GitGateway: Send + Sync {
    /// Clone `url` into `dest`, returning the working copy path.
    async fn clone_repository(
        &self,
        url: &str,
        dest: &Path,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;

    /// Bring the working copy at `path` up to date with `url`.
    async fn pull(
        &self,
        url: &str,
        path: &Path,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Whether `path` holds a usable working copy.
    fn is_working_copy(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    /// Open the single-owner handle used for one analysis pass.
    fn open(&self, path: &Path) -> Result<Box<dyn RepoHandle>>;
}

/// Order commits so every parent precedes its children, breaking ties by
/// commit time and then id. Parents outside the given set are ignored.
pub fn order_oldest_first(commits: Vec<CommitInfo>) -> Vec<CommitInfo> {
    let index: HashMap<CommitId, usize> = commits
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.clone(), i))
        .collect();

    let mut pending_parents = vec![0usize; commits.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); commits.len()];
    for (i, commit) in commits.iter().enumerate() {
        for parent in &commit.parent_ids {
            if let Some(&p) = index.get(parent) {
                pending_parents[i] += 1;
                children[p].push(i);
            }
        }
    }

    let key = |i: usize| Reverse((commits[i].committed_at, commits[i].id.clone(), i));
    let mut ready: BinaryHeap<_> = (0..commits.len())
        .filter(|&i| pending_parents[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(commits.len());
    while let Some(Reverse((_, _, i))) = ready.pop() {
        order.push(i);
        for &child in &children[i] {
            pending_parents[child] -= 1;
            if pending_parents[child] == 0 {
                ready.push(key(child));
            }
        }
    }

    let mut slots: Vec<Option<CommitInfo>> = commits.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn commit(id: &str, secs: i64, parents: &[&str]) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            committed_at: Utc.timestamp_opt(secs, 0).unwrap(),
            parent_ids: parents.iter().map(|p| CommitId::new(*p)).collect(),
        }
    }

    fn ids(commits: &[CommitInfo]) -> Vec<&str> {
        commits.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_linear_history_ordered_by_ancestry() {
        let commits = vec![
            commit("c", 300, &["b"]),
            commit("a", 100, &[]),
            commit("b", 200, &["a"]),
        ];
        assert_eq!(ids(&order_oldest_first(commits)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parent_precedes_child_despite_clock_skew() {
        // child has an earlier timestamp than its parent
        let commits = vec![commit("a", 500, &[]), commit("b", 100, &["a"])];
        assert_eq!(ids(&order_oldest_first(commits)), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_waits_for_both_parents() {
        let commits = vec![
            commit("m", 400, &["b", "f"]),
            commit("f", 250, &["a"]),
            commit("b", 200, &["a"]),
            commit("a", 100, &[]),
        ];
        assert_eq!(ids(&order_oldest_first(commits)), vec!["a", "b", "f", "m"]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let commits = vec![
            commit("z", 100, &[]),
            commit("y", 100, &[]),
            commit("x", 100, &[]),
        ];
        assert_eq!(ids(&order_oldest_first(commits)), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_missing_parents_are_ignored() {
        let commits = vec![commit("b", 200, &["gone"]), commit("a", 100, &[])];
        assert_eq!(ids(&order_oldest_first(commits)), vec!["a", "b"]);
    }
}
