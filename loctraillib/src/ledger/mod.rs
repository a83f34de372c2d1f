//! Failed-operation ledger.
//!
//! Commit analyses that fail during a pass are recorded as
//! [`FailedOperation`]s instead of aborting the pass. A [`RetryScheduler`]
//! picks them up later, resumes the work from the stored context, and either
//! deletes the entry or counts the attempt until the retry ceiling is
//! reached.

pub mod operation;
pub mod scheduler;

pub use operation::{
    CommitAnalysisContext, FailedOperation, LedgerState, OperationKind, RetryPolicy,
};
pub use scheduler::{RetryExecutor, RetryOutcome, RetryScheduler, RetrySummary};
