//! Persistence contracts the engine depends on.
//!
//! Storage itself lives outside the engine. The dispatcher, state machine
//! and pipeline see it only through these repositories, so an in-memory
//! [`MemoryStore`] can stand in for tests and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{GradableUnit, GradingStatus, Submission, SubmissionId, UnitId, UnitResult};
use crate::types::SandboxFile;

pub use crate::store::memory::MemoryStore;

mod memory;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Lost a write race or timed out on a lock. Safe to retry.
    #[error("store contention: {0}")]
    Contention(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// A referenced row is gone, e.g. a result for a deleted unit.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }

    pub fn submission_not_found(id: SubmissionId) -> Self {
        StoreError::NotFound {
            entity: "submission",
            id,
        }
    }

    pub fn unit_not_found(id: UnitId) -> Self {
        StoreError::NotFound { entity: "unit", id }
    }
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn get_submission(&self, id: SubmissionId) -> StoreResult<Submission>;

    /// Atomically set the status to `new` if it is currently `expected`
    /// (or unconditionally when `expected` is `None`). Returns whether the
    /// write happened.
    async fn compare_and_set_status(
        &self,
        id: SubmissionId,
        expected: Option<GradingStatus>,
        new: GradingStatus,
    ) -> StoreResult<bool>;

    async fn set_basic_score(&self, id: SubmissionId, score: u32) -> StoreResult<()>;

    async fn set_error_diagnostic(
        &self,
        id: SubmissionId,
        diagnostic: Option<String>,
    ) -> StoreResult<()>;

    async fn submissions_with_status(&self, status: GradingStatus)
    -> StoreResult<Vec<SubmissionId>>;
}

#[async_trait]
pub trait UnitRepository: Send + Sync {
    /// `NotFound` once the unit has been deleted.
    async fn get_unit(&self, id: UnitId) -> StoreResult<GradableUnit>;

    /// Units of a project, in definition order.
    async fn units_for_project(&self, project_id: &str) -> StoreResult<Vec<GradableUnit>>;

    /// Every instructor file of a project.
    async fn project_files(&self, project_id: &str) -> StoreResult<Vec<SandboxFile>>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Insert or replace the result for its (unit, submission) pair.
    /// `Integrity` when the unit or submission no longer exists.
    async fn upsert_result(&self, result: UnitResult) -> StoreResult<()>;

    async fn get_result(
        &self,
        unit_id: UnitId,
        submission_id: SubmissionId,
    ) -> StoreResult<Option<UnitResult>>;

    async fn results_for_submission(&self, submission_id: SubmissionId)
    -> StoreResult<Vec<UnitResult>>;
}

/// The three repositories, injected together.
#[derive(Clone)]
pub struct Repositories {
    pub submissions: Arc<dyn SubmissionRepository>,
    pub units: Arc<dyn UnitRepository>,
    pub results: Arc<dyn ResultRepository>,
}

impl Repositories {
    /// Serve every repository from one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SubmissionRepository + UnitRepository + ResultRepository + 'static,
    {
        Self {
            submissions: store.clone(),
            units: store.clone(),
            results: store,
        }
    }
}
