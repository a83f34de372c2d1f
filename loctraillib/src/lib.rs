//! # loctraillib
//!
//! Lines-of-code history for git repositories: one snapshot per commit.
//!
//! ## Overview
//!
//! For every commit reachable from a repository's HEAD, the engine records a
//! [`CommitLineSnapshot`]:
//!
//! - **Diff stats**: lines added and removed against the first parent (or the
//!   empty tree for a root commit)
//! - **Totals**: lines in the commit's full tree, bucketed by category
//!   (lowercased file extension), after ignore rules
//!
//! ## Features
//!
//! - **Incremental**: commits that already have a snapshot are skipped, so a
//!   second pass over unchanged history does no work
//! - **Fault contained**: a commit that fails to analyze goes to a failure
//!   ledger and is retried in the background, with a cool-down and a ceiling
//! - **Point in time**: trees and blobs are read from the object database by
//!   commit id, never from the checkout
//! - **Pluggable**: git access, persistence, and credentials sit behind
//!   traits ([`GitGateway`], [`Store`], [`CredentialProvider`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use loctraillib::{
//!     AnalyzeOptions, EngineConfig, GixGateway, MemoryStore, RepositorySynchronizer, Store,
//!     TrackedRepository,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> loctraillib::Result<()> {
//! let config = EngineConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let repo = TrackedRepository::new("rust-lang", "log", "https://github.com/rust-lang/log.git");
//! store.insert_repository(repo.clone()).await?;
//!
//! let sync = RepositorySynchronizer::new(
//!     store.clone(),
//!     Arc::new(GixGateway::new()),
//!     Arc::new(config.analyzer()?),
//!     "/tmp/loctrail/repos",
//! );
//! let report = sync
//!     .analyze_repository(repo.id, AnalyzeOptions::default(), &CancellationToken::new())
//!     .await?;
//! println!("{} commits, {} new snapshots", report.total_commits, report.processed);
//!
//! for snapshot in store.list_snapshots(repo.id).await? {
//!     println!("{} {:>8} +{} -{}", snapshot.commit_id.short(), snapshot.total_lines,
//!         snapshot.lines_added, snapshot.lines_removed);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod classify;
pub mod config;
pub mod count;
pub mod credentials;
pub mod error;
pub mod git;
pub mod ledger;
mod lockfile;
pub mod model;
pub mod store;

#[cfg(test)]
mod testing;

pub use analysis::{
    AnalysisReport, AnalyzeOptions, CommitAnalyzer, CommitOutcome, RepoLocks,
    RepositorySynchronizer,
};
pub use classify::{ClassificationPolicy, FileClassifier};
pub use config::EngineConfig;
pub use count::{CommentAwareCounter, CounterSet, LineCounter, PlainCounter};
pub use credentials::{
    Credential, CredentialProvider, EnvCredentials, NoCredentials, StaticCredentials,
};
pub use error::LoctrailError;
pub use git::{GitGateway, GixGateway, RepoHandle};
pub use ledger::{
    FailedOperation, LedgerState, RetryExecutor, RetryPolicy, RetryScheduler, RetrySummary,
};
pub use model::{
    AnalysisMarker, CommitId, CommitInfo, CommitLineSnapshot, DiffStats, RepoId,
    TrackedRepository,
};
pub use store::{JsonFileStore, MemoryStore, Store};

/// Result type for loctraillib operations
pub type Result<T> = std::result::Result<T, LoctrailError>;
