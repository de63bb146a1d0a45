//! Grades one unit for one submission in a fresh sandbox.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::GradingError;
use crate::model::{GradableUnit, Submission, UnitKind, UnitResult};
use crate::runner::CommandRunner;
use crate::sandbox::{SandboxBackend, SandboxHandle, SandboxManager, SandboxSpec};
use crate::store::{ResultRepository, StoreError};
use crate::types::SandboxFile;

mod mutation;
mod test_case;

/// Sandbox variable holding the submitting group's usernames.
pub const USERNAMES_VAR: &str = "usernames";

pub struct Pipeline<B> {
    sandboxes: SandboxManager<B>,
    runner: CommandRunner,
    default_image: String,
    /// Per-stream ceiling of the combined mutation suite logs
    log_ceiling: usize,
    results: Arc<dyn ResultRepository>,
}

impl<B: SandboxBackend> Pipeline<B> {
    pub fn new(
        sandboxes: SandboxManager<B>,
        config: &Config,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            sandboxes,
            runner: CommandRunner::from_config(&config.grading),
            default_image: config.default_image.clone(),
            log_ceiling: config.grading.combined_log_ceiling,
            results,
        }
    }

    pub fn sandboxes(&self) -> &SandboxManager<B> {
        &self.sandboxes
    }

    fn sandbox_spec(&self, unit: &GradableUnit, submission: &Submission) -> SandboxSpec {
        let image = unit
            .sandbox_image
            .clone()
            .unwrap_or_else(|| self.default_image.clone());
        SandboxSpec::new(image)
            .with_env(USERNAMES_VAR, submission.usernames())
            .with_network(unit.allow_network_access)
    }

    /// Run every step of `unit` against `submission`. The sandbox is torn
    /// down on every path; nothing is persisted.
    #[instrument(skip_all, fields(unit_id = unit.id, submission_id = submission.id))]
    pub async fn grade(
        &self,
        unit: &GradableUnit,
        submission: &Submission,
        project_files: &[SandboxFile],
    ) -> Result<UnitResult, GradingError> {
        let mut handle = self
            .sandboxes
            .create(&self.sandbox_spec(unit, submission))
            .await?;
        let result = self
            .grade_in(&mut handle, unit, submission, project_files)
            .await;
        self.sandboxes.dispose(handle).await;
        result
    }

    async fn grade_in(
        &self,
        handle: &mut B::Handle,
        unit: &GradableUnit,
        submission: &Submission,
        project_files: &[SandboxFile],
    ) -> Result<UnitResult, GradingError> {
        let instructor_files: Vec<SandboxFile> = project_files
            .iter()
            .filter(|file| unit.instructor_files.contains(&file.name))
            .cloned()
            .collect();
        handle.copy_files_in(&instructor_files).await?;
        handle.copy_files_in(&submission.files).await?;

        let result = match &unit.kind {
            UnitKind::TestCase(spec) => UnitResult::TestCase(
                test_case::grade(
                    &self.runner,
                    handle,
                    unit.id,
                    submission.id,
                    spec,
                    project_files,
                )
                .await?,
            ),
            UnitKind::MutationSuite(spec) => UnitResult::MutationSuite(
                mutation::grade(
                    &self.runner,
                    handle,
                    unit.id,
                    submission.id,
                    spec,
                    self.log_ceiling,
                )
                .await?,
            ),
        };
        Ok(result)
    }

    /// Grade, then upsert the result. `Ok(None)` when the unit or
    /// submission was deleted before the result could be saved.
    pub async fn grade_and_persist(
        &self,
        unit: &GradableUnit,
        submission: &Submission,
        project_files: &[SandboxFile],
    ) -> Result<Option<UnitResult>, GradingError> {
        let result = self.grade(unit, submission, project_files).await?;
        match self.results.upsert_result(result.clone()).await {
            Ok(()) => Ok(Some(result)),
            Err(StoreError::Integrity(reason)) => {
                info!(
                    unit_id = unit.id,
                    submission_id = submission.id,
                    reason,
                    "result discarded"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
