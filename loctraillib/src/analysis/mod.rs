//! Commit analysis and repository synchronization.
//!
//! [`CommitAnalyzer`] turns one commit into a [`CommitLineSnapshot`];
//! [`RepositorySynchronizer`] keeps a working copy current and runs the
//! analyzer over every commit that still needs a snapshot.
//!
//! [`CommitLineSnapshot`]: crate::model::CommitLineSnapshot

pub mod commit;
pub mod locks;
pub mod sync;

pub use commit::{CommitAnalyzer, CommitFailure, DEFAULT_MAX_BLOB_BYTES};
pub use locks::{RepoGuard, RepoLocks};
pub use sync::{AnalysisReport, AnalyzeOptions, CommitOutcome, RepositorySynchronizer};
