//! Per-repository single-flight guard.
//!
//! Within a process the guard is a shared set of repository ids. When the
//! locks are bound to a directory, each claim also takes an exclusive file
//! lock on `<dir>/<repo id>.lock`, so separate processes sharing a
//! workspace exclude each other as well.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::LoctrailError;
use crate::lockfile::LockFile;
use crate::model::RepoId;
use crate::Result;

/// Set of repositories with an analysis run in progress.
#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    held: Arc<Mutex<HashSet<RepoId>>>,
    dir: Option<PathBuf>,
}

impl RepoLocks {
    /// Locks visible to this process only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks backed by lock files in `dir`, shared with every process
    /// using the same directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            held: Arc::default(),
            dir: Some(dir.into()),
        }
    }

    /// Claim `repo`, failing fast if another run already holds it.
    pub fn try_acquire(&self, repo: RepoId) -> Result<RepoGuard> {
        {
            let mut held = self
                .held
                .lock()
                .map_err(|_| LoctrailError::Store("repository lock poisoned".to_string()))?;
            if !held.insert(repo) {
                return Err(LoctrailError::AnalysisInProgress(repo));
            }
        }

        let file = match self.lock_file(repo) {
            Ok(file) => file,
            Err(e) => {
                self.release(repo);
                return Err(e);
            }
        };
        Ok(RepoGuard {
            held: Arc::clone(&self.held),
            repo,
            _file: file,
        })
    }

    fn lock_file(&self, repo: RepoId) -> Result<Option<LockFile>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.lock", repo));
        match LockFile::try_exclusive(&path)? {
            Some(file) => Ok(Some(file)),
            None => {
                debug!(repo_id = %repo, path = %path.display(), "Repository locked by another process");
                Err(LoctrailError::AnalysisInProgress(repo))
            }
        }
    }

    fn release(&self, repo: RepoId) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&repo);
        }
    }

    pub fn is_held(&self, repo: RepoId) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&repo))
            .unwrap_or(false)
    }
}

/// Releases the repository when dropped.
#[derive(Debug)]
pub struct RepoGuard {
    held: Arc<Mutex<HashSet<RepoId>>>,
    repo: RepoId,
    // unlocked on drop
    _file: Option<LockFile>,
}

impl Drop for RepoGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.repo);
        }
    }
}
