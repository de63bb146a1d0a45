//! Submission lifecycle.
//!
//! ```text
//! queued -> being_graded -> waiting_for_deferred -> finished_grading
//!                        -> finished_grading
//! queued | being_graded  -> removed_from_queue
//! any non-terminal       -> error
//! ```
//!
//! Every write re-reads the stored status and lands through a
//! compare-and-set, so a cancellation persisted before a worker's write
//! always wins. Writers that must decide between `waiting_for_deferred`
//! and `finished_grading` additionally hold the submission's lock from
//! [`StatusMachine::lock`] while they decide.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::error::GradingError;
use crate::model::{GradingStatus, SubmissionId};
use crate::store::{StoreError, SubmissionRepository};

/// Compare-and-set attempts before a transition counts as contended.
const MAX_CAS_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: GradingStatus,
        to: GradingStatus,
    },

    #[error("submission {id} cannot be removed from the queue while {status}")]
    NotCancellable {
        id: SubmissionId,
        status: GradingStatus,
    },
}

/// Whether `from -> to` is an edge of the lifecycle.
pub fn is_valid_transition(from: GradingStatus, to: GradingStatus) -> bool {
    use GradingStatus::*;

    matches!(
        (from, to),
        (Queued, BeingGraded | RemovedFromQueue | Error)
            // redelivered job
            | (BeingGraded, BeingGraded)
            | (BeingGraded, WaitingForDeferred | FinishedGrading | RemovedFromQueue | Error)
            | (WaitingForDeferred, FinishedGrading | Error)
    )
}

/// How far along the lifecycle `status` is. A write to a status no further
/// along than the stored one is stale.
fn progress(status: GradingStatus) -> u8 {
    match status {
        GradingStatus::Queued => 0,
        GradingStatus::BeingGraded => 1,
        GradingStatus::WaitingForDeferred => 2,
        GradingStatus::FinishedGrading
        | GradingStatus::RemovedFromQueue
        | GradingStatus::Error => 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The stored status already made the write meaningless: the
    /// submission was cancelled, or another writer finished it first.
    Discarded { current: GradingStatus },
}

impl TransitionOutcome {
    pub fn is_applied(self) -> bool {
        self == TransitionOutcome::Applied
    }
}

/// Per-submission async locks, dropped once nobody holds them.
#[derive(Debug, Default)]
struct SubmissionLocks {
    locks: Mutex<HashMap<SubmissionId, Arc<AsyncMutex<()>>>>,
}

impl SubmissionLocks {
    fn get(&self, id: SubmissionId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id).or_default().clone()
    }
}

pub struct StatusMachine {
    submissions: Arc<dyn SubmissionRepository>,
    locks: SubmissionLocks,
}

impl StatusMachine {
    pub fn new(submissions: Arc<dyn SubmissionRepository>) -> Self {
        Self {
            submissions,
            locks: SubmissionLocks::default(),
        }
    }

    /// Enter the submission's single-writer section.
    pub async fn lock(&self, id: SubmissionId) -> OwnedMutexGuard<()> {
        self.locks.get(id).lock_owned().await
    }

    pub async fn current(&self, id: SubmissionId) -> Result<GradingStatus, GradingError> {
        Ok(self.submissions.get_submission(id).await?.status)
    }

    /// Move the submission to `to`.
    ///
    /// Returns `Discarded` instead of writing when the stored status is
    /// `removed_from_queue`, or when `to` is unreachable from a status at
    /// least as far along, such as a redelivered job asking for
    /// `being_graded` while deferred units run. Any other invalid
    /// transition is an error.
    #[instrument(skip(self), fields(submission_id = id, to = %to))]
    pub async fn transition(
        &self,
        id: SubmissionId,
        to: GradingStatus,
    ) -> Result<TransitionOutcome, GradingError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.current(id).await?;

            let cancelled = current == GradingStatus::RemovedFromQueue;
            if cancelled || !is_valid_transition(current, to) {
                if cancelled || progress(current) >= progress(to) {
                    warn!(current = %current, "status write discarded");
                    return Ok(TransitionOutcome::Discarded { current });
                }
                return Err(StatusError::InvalidTransition { from: current, to }.into());
            }

            if self
                .submissions
                .compare_and_set_status(id, Some(current), to)
                .await?
            {
                info!(from = %current, "status changed");
                return Ok(TransitionOutcome::Applied);
            }
        }

        Err(StoreError::Contention(format!("status of submission {id} kept changing")).into())
    }

    /// User-initiated cancellation. Idempotent once removed; rejected
    /// unless the submission is queued or being graded.
    #[instrument(skip(self), fields(submission_id = id))]
    pub async fn remove_from_queue(&self, id: SubmissionId) -> Result<(), GradingError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let status = self.current(id).await?;
            match status {
                GradingStatus::RemovedFromQueue => return Ok(()),
                GradingStatus::Queued | GradingStatus::BeingGraded => {}
                _ => return Err(StatusError::NotCancellable { id, status }.into()),
            }

            if self
                .submissions
                .compare_and_set_status(id, Some(status), GradingStatus::RemovedFromQueue)
                .await?
            {
                info!(from = %status, "removed from queue");
                return Ok(());
            }
        }

        Err(StoreError::Contention(format!("status of submission {id} kept changing")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn machine() -> (Arc<MemoryStore>, StatusMachine, SubmissionId) {
        let store = Arc::new(MemoryStore::new());
        let id = store.create_submission("p1", Vec::new(), Vec::new());
        let machine = StatusMachine::new(store.clone());
        (store, machine, id)
    }

    #[tokio::test]
    async fn happy_path() {
        let (store, machine, id) = machine();
        for status in [
            GradingStatus::BeingGraded,
            GradingStatus::WaitingForDeferred,
            GradingStatus::FinishedGrading,
        ] {
            assert!(machine.transition(id, status).await.unwrap().is_applied());
        }
        assert_eq!(store.submission(id).unwrap().status, GradingStatus::FinishedGrading);
    }

    #[tokio::test]
    async fn stale_being_graded_is_discarded_while_waiting() {
        let (store, machine, id) = machine();
        machine.transition(id, GradingStatus::BeingGraded).await.unwrap();
        machine
            .transition(id, GradingStatus::WaitingForDeferred)
            .await
            .unwrap();

        let outcome = machine.transition(id, GradingStatus::BeingGraded).await.unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Discarded {
                current: GradingStatus::WaitingForDeferred
            }
        );
        assert_eq!(store.submission(id).unwrap().status, GradingStatus::WaitingForDeferred);
    }

    #[tokio::test]
    async fn write_after_cancellation_is_discarded() {
        let (store, machine, id) = machine();
        machine.transition(id, GradingStatus::BeingGraded).await.unwrap();
        machine.remove_from_queue(id).await.unwrap();

        let outcome = machine
            .transition(id, GradingStatus::FinishedGrading)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Discarded {
                current: GradingStatus::RemovedFromQueue
            }
        );
        let outcome = machine.transition(id, GradingStatus::Error).await.unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(store.submission(id).unwrap().status, GradingStatus::RemovedFromQueue);
    }

    #[tokio::test]
    async fn waiting_after_finished_is_discarded() {
        let (store, machine, id) = machine();
        machine.transition(id, GradingStatus::BeingGraded).await.unwrap();
        machine
            .transition(id, GradingStatus::FinishedGrading)
            .await
            .unwrap();

        let outcome = machine
            .transition(id, GradingStatus::WaitingForDeferred)
            .await
            .unwrap();
        assert!(!outcome.is_applied());
        assert_eq!(store.submission(id).unwrap().status, GradingStatus::FinishedGrading);
    }

    #[tokio::test]
    async fn invalid_transition_from_live_state_is_an_error() {
        let (_, machine, id) = machine();
        let err = machine
            .transition(id, GradingStatus::FinishedGrading)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GradingError::Status(StatusError::InvalidTransition {
                from: GradingStatus::Queued,
                to: GradingStatus::FinishedGrading,
            })
        ));
    }

    #[tokio::test]
    async fn removal_rules() {
        let (store, machine, id) = machine();
        machine.remove_from_queue(id).await.unwrap();
        // idempotent
        machine.remove_from_queue(id).await.unwrap();
        assert_eq!(store.submission(id).unwrap().status, GradingStatus::RemovedFromQueue);

        let other = store.create_submission("p1", Vec::new(), Vec::new());
        machine.transition(other, GradingStatus::BeingGraded).await.unwrap();
        machine
            .transition(other, GradingStatus::WaitingForDeferred)
            .await
            .unwrap();
        let err = machine.remove_from_queue(other).await.unwrap_err();
        assert!(matches!(
            err,
            GradingError::Status(StatusError::NotCancellable {
                status: GradingStatus::WaitingForDeferred,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn lock_is_exclusive_per_submission() {
        let (_, machine, id) = machine();
        let guard = machine.lock(id).await;
        assert!(machine.locks.get(id).try_lock().is_err());
        // other submissions are unaffected
        assert!(machine.locks.get(id + 1).try_lock().is_ok());
        drop(guard);
        assert!(machine.locks.get(id).try_lock().is_ok());
    }
}
