//! Core data structures: tracked repositories and per-commit line snapshots.
//!
//! A [`TrackedRepository`] is the aggregate root. [`CommitLineSnapshot`]s and
//! failed-operation records reference it by [`RepoId`] and are stored and
//! deleted independently.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque repository identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(Uuid);

impl RepoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RepoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RepoId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A commit's content hash in hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs and tables.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(10) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Points at the newest commit covered by the last completed analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMarker {
    pub commit_id: CommitId,
    pub analyzed_at: DateTime<Utc>,
}

/// A repository registered for history analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRepository {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
    pub clone_url: String,
    /// Local working copy, set after the first successful sync
    pub local_path: Option<PathBuf>,
    pub last_analyzed: Option<AnalysisMarker>,
    pub created_at: DateTime<Utc>,
}

impl TrackedRepository {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self {
            id: RepoId::new(),
            owner: owner.into(),
            name: name.into(),
            clone_url: clone_url.into(),
            local_path: None,
            last_analyzed: None,
            created_at: Utc::now(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Directory name used for the working copy under a workspace root.
    ///
    /// Unique per repository id; the sanitized name is only a readable
    /// suffix.
    pub fn working_copy_dir_name(&self) -> String {
        format!("{}-{}_{}", self.id, sanitize(&self.owner), sanitize(&self.name))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A commit as enumerated from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub committed_at: DateTime<Utc>,
    pub parent_ids: Vec<CommitId>,
}

impl CommitInfo {
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }
}

/// Line insertions and removals from a first-parent diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub lines_added: u64,
    pub lines_removed: u64,
}

impl DiffStats {
    pub fn new(lines_added: u64, lines_removed: u64) -> Self {
        Self {
            lines_added,
            lines_removed,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.lines_added == 0 && self.lines_removed == 0
    }

    pub fn net(&self) -> i64 {
        self.lines_added as i64 - self.lines_removed as i64
    }
}

impl Add for DiffStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            lines_added: self.lines_added + other.lines_added,
            lines_removed: self.lines_removed + other.lines_removed,
        }
    }
}

impl AddAssign for DiffStats {
    fn add_assign(&mut self, other: Self) {
        self.lines_added += other.lines_added;
        self.lines_removed += other.lines_removed;
    }
}

/// Lines of code at one commit, bucketed by file category.
///
/// At most one snapshot exists per `(repo_id, commit_id)`; re-analysis
/// replaces it rather than adding a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLineSnapshot {
    pub repo_id: RepoId,
    pub commit_id: CommitId,
    pub committed_at: DateTime<Utc>,
    /// Sum of all category counts
    pub total_lines: u64,
    /// Lines inserted relative to the first parent (whole tree for a root commit)
    pub lines_added: u64,
    /// Lines deleted relative to the first parent (0 for a root commit)
    pub lines_removed: u64,
    pub lines_by_category: BTreeMap<String, u64>,
    pub analyzed_at: DateTime<Utc>,
}

impl CommitLineSnapshot {
    pub fn new(
        repo_id: RepoId,
        commit: &CommitInfo,
        diff: DiffStats,
        lines_by_category: BTreeMap<String, u64>,
    ) -> Self {
        let total_lines = lines_by_category.values().sum();
        Self {
            repo_id,
            commit_id: commit.id.clone(),
            committed_at: commit.committed_at,
            total_lines,
            lines_added: diff.lines_added,
            lines_removed: diff.lines_removed,
            lines_by_category,
            analyzed_at: Utc::now(),
        }
    }

    pub fn diff(&self) -> DiffStats {
        DiffStats::new(self.lines_added, self.lines_removed)
    }

    /// A zero/zero diff marks a snapshot that was never really counted and
    /// may be replaced by a forced re-analysis.
    pub fn is_stale(&self) -> bool {
        self.diff().is_zero()
    }

    pub fn net_delta(&self) -> i64 {
        self.diff().net()
    }
}
