//! Error types for loctraillib

use std::path::PathBuf;
use thiserror::Error;

use crate::model::RepoId;

/// Errors that can occur while syncing, analyzing, or persisting history
#[derive(Error, Debug)]
pub enum LoctrailError {
    /// Clone or pull failed
    #[error("transport error for '{url}': {message}")]
    Transport { url: String, message: String },

    /// Local working copy is missing or not a git repository
    #[error("invalid working copy '{path}': {message}")]
    WorkingCopy { path: PathBuf, message: String },

    /// Git object access error
    #[error("git error: {0}")]
    Git(String),

    /// Commit id could not be resolved
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// Path does not name a blob in the given commit
    #[error("blob '{path}' not found in commit {commit}")]
    BlobNotFound { commit: String, path: String },

    /// Repository id is not registered
    #[error("repository not found: {0}")]
    RepositoryNotFound(RepoId),

    /// Another analysis run holds this repository
    #[error("analysis already in progress for repository {0}")]
    AnalysisInProgress(RepoId),

    /// Run was cancelled by the caller
    #[error("analysis cancelled")]
    Cancelled,

    /// Persistence gateway failure
    #[error("store error: {0}")]
    Store(String),

    /// Invalid glob pattern in a classification policy
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    /// Configuration could not be loaded
    #[error("invalid configuration '{path}': {message}")]
    Config { path: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task panicked or was aborted
    #[error("background task failed: {0}")]
    Task(String),
}

impl LoctrailError {
    pub(crate) fn git(context: &str, err: impl std::fmt::Display) -> Self {
        LoctrailError::Git(format!("{}: {}", context, err))
    }

    /// Whether this error aborts a whole repository invocation rather than a
    /// single commit.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LoctrailError::Transport { .. } | LoctrailError::WorkingCopy { .. }
        )
    }
}
