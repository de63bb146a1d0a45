//! In-memory repositories.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::model::{GradableUnit, GradingStatus, Submission, SubmissionId, UnitId, UnitResult};
use crate::store::{
    ResultRepository, StoreError, StoreResult, SubmissionRepository, UnitRepository,
};
use crate::types::SandboxFile;

#[derive(Debug)]
struct StoredUnit {
    project_id: String,
    unit: GradableUnit,
}

#[derive(Debug, Default)]
struct State {
    project_files: HashMap<String, Vec<SandboxFile>>,
    /// Definition order
    units: Vec<StoredUnit>,
    submissions: HashMap<SubmissionId, Submission>,
    results: HashMap<(UnitId, SubmissionId), UnitResult>,
    next_submission_id: SubmissionId,
}

/// Every repository over one mutex-guarded map set. Deleting a unit
/// cascades to its results, as a relational store would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    #[cfg(test)]
    failing_result_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a project's units and instructor files, replacing any
    /// previous definition.
    pub fn insert_project(
        &self,
        project_id: impl Into<String>,
        units: impl IntoIterator<Item = GradableUnit>,
        files: Vec<SandboxFile>,
    ) {
        let project_id = project_id.into();
        let mut state = self.state();
        state.units.retain(|stored| stored.project_id != project_id);
        state.units.extend(units.into_iter().map(|unit| StoredUnit {
            project_id: project_id.clone(),
            unit,
        }));
        state.project_files.insert(project_id, files);
    }

    /// Store a new queued submission and return its id.
    pub fn create_submission(
        &self,
        project_id: impl Into<String>,
        group_members: Vec<String>,
        files: Vec<SandboxFile>,
    ) -> SubmissionId {
        let mut state = self.state();
        state.next_submission_id += 1;
        let id = state.next_submission_id;
        state
            .submissions
            .insert(id, Submission::new(id, project_id, group_members, files));
        id
    }

    /// Delete a unit and its results. Returns whether it existed.
    pub fn remove_unit(&self, id: UnitId) -> bool {
        let mut state = self.state();
        let before = state.units.len();
        state.units.retain(|stored| stored.unit.id != id);
        state.results.retain(|(unit_id, _), _| *unit_id != id);
        state.units.len() != before
    }

    pub fn submission(&self, id: SubmissionId) -> Option<Submission> {
        self.state().submissions.get(&id).cloned()
    }

    pub fn result(&self, unit_id: UnitId, submission_id: SubmissionId) -> Option<UnitResult> {
        self.state().results.get(&(unit_id, submission_id)).cloned()
    }

    pub fn result_count(&self) -> usize {
        self.state().results.len()
    }

    /// Fail the next `n` result writes with contention.
    #[cfg(test)]
    pub(crate) fn fail_result_writes(&self, n: u32) {
        self.failing_result_writes.store(n, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_result_write_failure(&self) -> bool {
        self.failing_result_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn with_submission<T>(
        &self,
        id: SubmissionId,
        f: impl FnOnce(&mut Submission) -> T,
    ) -> StoreResult<T> {
        let mut state = self.state();
        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::submission_not_found(id))?;
        Ok(f(submission))
    }
}

#[async_trait]
impl SubmissionRepository for MemoryStore {
    async fn get_submission(&self, id: SubmissionId) -> StoreResult<Submission> {
        self.with_submission(id, |submission| submission.clone())
    }

    async fn compare_and_set_status(
        &self,
        id: SubmissionId,
        expected: Option<GradingStatus>,
        new: GradingStatus,
    ) -> StoreResult<bool> {
        self.with_submission(id, |submission| {
            if expected.is_some_and(|expected| expected != submission.status) {
                return false;
            }
            submission.status = new;
            submission.updated_at = Utc::now();
            true
        })
    }

    async fn set_basic_score(&self, id: SubmissionId, score: u32) -> StoreResult<()> {
        self.with_submission(id, |submission| {
            submission.basic_score = score;
            submission.updated_at = Utc::now();
        })
    }

    async fn set_error_diagnostic(
        &self,
        id: SubmissionId,
        diagnostic: Option<String>,
    ) -> StoreResult<()> {
        self.with_submission(id, |submission| {
            submission.error_diagnostic = diagnostic;
            submission.updated_at = Utc::now();
        })
    }

    async fn submissions_with_status(
        &self,
        status: GradingStatus,
    ) -> StoreResult<Vec<SubmissionId>> {
        let mut ids: Vec<SubmissionId> = self
            .state()
            .submissions
            .values()
            .filter(|submission| submission.status == status)
            .map(|submission| submission.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl UnitRepository for MemoryStore {
    async fn get_unit(&self, id: UnitId) -> StoreResult<GradableUnit> {
        self.state()
            .units
            .iter()
            .find(|stored| stored.unit.id == id)
            .map(|stored| stored.unit.clone())
            .ok_or_else(|| StoreError::unit_not_found(id))
    }

    async fn units_for_project(&self, project_id: &str) -> StoreResult<Vec<GradableUnit>> {
        Ok(self
            .state()
            .units
            .iter()
            .filter(|stored| stored.project_id == project_id)
            .map(|stored| stored.unit.clone())
            .collect())
    }

    async fn project_files(&self, project_id: &str) -> StoreResult<Vec<SandboxFile>> {
        Ok(self
            .state()
            .project_files
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ResultRepository for MemoryStore {
    async fn upsert_result(&self, result: UnitResult) -> StoreResult<()> {
        #[cfg(test)]
        if self.take_result_write_failure() {
            return Err(StoreError::Contention("result write conflicted".to_string()));
        }

        let mut state = self.state();
        let (unit_id, submission_id) = result.key();
        if !state.units.iter().any(|stored| stored.unit.id == unit_id) {
            return Err(StoreError::Integrity(format!("unit {unit_id} does not exist")));
        }
        if !state.submissions.contains_key(&submission_id) {
            return Err(StoreError::Integrity(format!(
                "submission {submission_id} does not exist"
            )));
        }
        state.results.insert((unit_id, submission_id), result);
        Ok(())
    }

    async fn get_result(
        &self,
        unit_id: UnitId,
        submission_id: SubmissionId,
    ) -> StoreResult<Option<UnitResult>> {
        Ok(self.result(unit_id, submission_id))
    }

    async fn results_for_submission(
        &self,
        submission_id: SubmissionId,
    ) -> StoreResult<Vec<UnitResult>> {
        let mut results: Vec<UnitResult> = self
            .state()
            .results
            .values()
            .filter(|result| result.submission_id() == submission_id)
            .cloned()
            .collect();
        results.sort_by_key(UnitResult::unit_id);
        Ok(results)
    }
}
