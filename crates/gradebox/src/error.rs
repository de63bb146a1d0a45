//! Grading failure classification.
//!
//! | kind                     | examples                           | handling                  |
//! |--------------------------|------------------------------------|---------------------------|
//! | expected failure         | nonzero exit, timeout              | recorded in the result    |
//! | transient infrastructure | store contention, sandbox creation | retried, then fatal       |
//! | integrity race           | submission cancelled, unit deleted | job ends quietly          |
//! | fatal                    | retries exhausted, backend failure | submission marked `error` |
//! | teardown failure         | sandbox cleanup failed             | operator alert only       |
//!
//! Expected failures never become errors and teardown failures never reach
//! the caller, so neither has a variant here.

use thiserror::Error;

use crate::model::{SubmissionId, UnitId};
use crate::sandbox::SandboxError;
use crate::status::StatusError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("submission {0} was removed from the queue")]
    RemovedFromQueue(SubmissionId),

    #[error("unit {0} was deleted")]
    UnitDeleted(UnitId),
}

#[derive(Debug, Error)]
pub enum GradingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("grading aborted: {0}")]
    Aborted(AbortReason),

    #[error("unit {unit_id} reads instructor file '{name}', which the project does not have")]
    MissingInstructorFile { unit_id: UnitId, name: String },

    #[error("grading queue is closed")]
    QueueClosed,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<GradingError>,
    },
}

impl GradingError {
    pub fn is_transient(&self) -> bool {
        match self {
            GradingError::Store(err) => err.is_transient(),
            GradingError::Sandbox(err) => err.is_transient(),
            _ => false,
        }
    }

    /// The submission or unit went away mid-job.
    pub fn is_integrity_race(&self) -> bool {
        matches!(
            self,
            GradingError::Aborted(_)
                | GradingError::Store(StoreError::NotFound { .. } | StoreError::Integrity(_))
        )
    }
}
