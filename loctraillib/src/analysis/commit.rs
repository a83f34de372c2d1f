//! Per-commit line counting.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace};

use crate::classify::{ClassificationPolicy, FileClassifier};
use crate::count::CounterSet;
use crate::error::LoctrailError;
use crate::git::{EntryKind, RepoHandle, WalkAction};
use crate::model::{CommitId, CommitInfo, CommitLineSnapshot, DiffStats, RepoId};
use crate::Result;

/// Blobs larger than this are skipped when counting.
pub const DEFAULT_MAX_BLOB_BYTES: u64 = 4 * 1024 * 1024;

/// A failed analysis, with whatever was computed before the failure.
#[derive(Debug)]
pub struct CommitFailure {
    pub error: LoctrailError,
    pub diff_stats: Option<DiffStats>,
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Produces a [`CommitLineSnapshot`] for a single commit.
///
/// Diff stats cover every changed blob. The per-category totals only cover
/// files the classifier accepts.
#[derive(Debug, Clone)]
pub struct CommitAnalyzer {
    classifier: FileClassifier,
    counters: CounterSet,
    max_blob_bytes: u64,
}

impl CommitAnalyzer {
    pub fn new(classifier: FileClassifier, counters: CounterSet) -> Self {
        Self {
            classifier,
            counters,
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
        }
    }

    /// Analyzer with the standard counters for `policy`.
    pub fn from_policy(policy: &ClassificationPolicy) -> Result<Self> {
        Ok(Self::new(FileClassifier::new(policy)?, CounterSet::standard()))
    }

    pub fn with_max_blob_bytes(mut self, max_blob_bytes: u64) -> Self {
        self.max_blob_bytes = max_blob_bytes;
        self
    }

    pub fn classifier(&self) -> &FileClassifier {
        &self.classifier
    }

    pub fn analyze_commit(
        &self,
        handle: &dyn RepoHandle,
        repo_id: RepoId,
        commit: &CommitInfo,
    ) -> Result<CommitLineSnapshot> {
        self.resume(handle, repo_id, commit, None)
            .map_err(|failure| failure.error)
    }

    /// Analyze `commit`, reusing diff stats from an earlier attempt when
    /// given.
    pub fn resume(
        &self,
        handle: &dyn RepoHandle,
        repo_id: RepoId,
        commit: &CommitInfo,
        known_diff: Option<DiffStats>,
    ) -> std::result::Result<CommitLineSnapshot, CommitFailure> {
        let diff = match known_diff {
            Some(diff) => diff,
            None => handle
                .diff_stats(&commit.id, self.max_blob_bytes)
                .map_err(|error| CommitFailure {
                    error,
                    diff_stats: None,
                })?,
        };

        let by_category = self
            .count_lines(handle, &commit.id)
            .map_err(|error| CommitFailure {
                error,
                diff_stats: Some(diff),
            })?;

        let snapshot = CommitLineSnapshot::new(repo_id, commit, diff, by_category);
        debug!(
            commit = %commit.id.short(),
            total = snapshot.total_lines,
            added = diff.lines_added,
            removed = diff.lines_removed,
            "Analyzed commit"
        );
        Ok(snapshot)
    }

    /// Count lines per category in the commit's full tree.
    pub fn count_lines(
        &self,
        handle: &dyn RepoHandle,
        commit: &CommitId,
    ) -> Result<BTreeMap<String, u64>> {
        let mut files = Vec::new();
        handle.walk_tree(commit, &mut |entry| match entry.kind {
            EntryKind::Directory if self.classifier.should_ignore_directory(entry.path) => {
                WalkAction::Prune
            }
            EntryKind::Directory => WalkAction::Descend,
            EntryKind::File => {
                if let Some(category) = self.classifier.countable_category(entry.name, entry.path)
                {
                    files.push((entry.path.to_string(), category));
                }
                WalkAction::Descend
            }
        })?;

        let mut by_category = BTreeMap::new();
        for (path, category) in files {
            let Some(data) = handle.read_blob_within(commit, &path, self.max_blob_bytes)? else {
                trace!(path = %path, "Skipped oversized blob");
                continue;
            };
            let lines = self.counters.count_blob(&category, &data);
            *by_category.entry(category).or_insert(0) += lines;
        }
        Ok(by_category)
    }
}
