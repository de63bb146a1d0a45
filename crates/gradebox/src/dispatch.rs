//! Schedules grading work and commits each submission's final status.
//!
//! A submission job grades every non-deferred unit, then moves the
//! submission to `finished_grading`, or to `waiting_for_deferred` and
//! enqueues one job per deferred unit. The last deferred job to land
//! finishes the submission; [`Dispatcher::check_finished_deferred`]
//! sweeps up any submission a crashed worker left waiting.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AbortReason, GradingError};
use crate::feedback::{ResolvedFeedbackConfig, UnitFeedback};
use crate::model::{GradableUnit, GradingStatus, Submission, SubmissionId, UnitId};
use crate::pipeline::Pipeline;
use crate::retry::RetryPolicy;
use crate::sandbox::SandboxBackend;
use crate::status::{StatusMachine, TransitionOutcome};
use crate::store::{Repositories, StoreError};
use crate::types::SandboxFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingJob {
    Submission(SubmissionId),
    DeferredUnit {
        unit_id: UnitId,
        submission_id: SubmissionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeOutcome {
    Finished,
    WaitingForDeferred,
    /// A deferred unit was graded; the submission may still be waiting.
    DeferredGraded,
    /// The submission was not in a state this job could act on.
    Skipped { status: GradingStatus },
    /// The submission or unit went away mid-job. Nothing was committed.
    Aborted,
}

pub type JobReceiver = mpsc::UnboundedReceiver<GradingJob>;

pub struct Dispatcher<B> {
    repos: Repositories,
    status: StatusMachine,
    pipeline: Pipeline<B>,
    retry: RetryPolicy,
    jobs: mpsc::UnboundedSender<GradingJob>,
}

impl<B: SandboxBackend> Dispatcher<B> {
    /// The receiver feeds [`Dispatcher::spawn_workers`], or a caller that
    /// runs jobs itself through [`Dispatcher::run_job`].
    pub fn new(
        repos: Repositories,
        pipeline: Pipeline<B>,
        retry: RetryPolicy,
    ) -> (Self, JobReceiver) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            status: StatusMachine::new(repos.submissions.clone()),
            repos,
            pipeline,
            retry,
            jobs,
        };
        (dispatcher, receiver)
    }

    pub fn status(&self) -> &StatusMachine {
        &self.status
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    pub fn schedule_grading(&self, submission_id: SubmissionId) -> Result<(), GradingError> {
        self.enqueue(GradingJob::Submission(submission_id))
    }

    pub fn schedule_deferred_unit(
        &self,
        unit_id: UnitId,
        submission_id: SubmissionId,
    ) -> Result<(), GradingError> {
        self.enqueue(GradingJob::DeferredUnit {
            unit_id,
            submission_id,
        })
    }

    fn enqueue(&self, job: GradingJob) -> Result<(), GradingError> {
        debug!(?job, "job queued");
        self.jobs.send(job).map_err(|_| GradingError::QueueClosed)
    }

    pub async fn run_job(&self, job: GradingJob) -> Result<GradeOutcome, GradingError> {
        match job {
            GradingJob::Submission(id) => self.grade_submission(id).await,
            GradingJob::DeferredUnit {
                unit_id,
                submission_id,
            } => self.grade_deferred_unit(unit_id, submission_id).await,
        }
    }

    /// Grade every non-deferred unit of a submission and commit its
    /// status. A fatal failure moves the submission to `error` and is
    /// returned; a cancelled submission or deleted unit is not an error.
    #[instrument(skip(self))]
    pub async fn grade_submission(
        &self,
        submission_id: SubmissionId,
    ) -> Result<GradeOutcome, GradingError> {
        let outcome = self.grade_inline_units(submission_id).await;
        self.settle(submission_id, outcome).await
    }

    /// Grade one deferred unit, then finish the submission if it was
    /// the last one outstanding.
    #[instrument(skip(self))]
    pub async fn grade_deferred_unit(
        &self,
        unit_id: UnitId,
        submission_id: SubmissionId,
    ) -> Result<GradeOutcome, GradingError> {
        let outcome = self.grade_deferred(unit_id, submission_id).await;
        self.settle(submission_id, outcome).await
    }

    /// Finish every waiting submission whose deferred units all have
    /// results. Returns the submissions finished by this sweep.
    #[instrument(skip(self))]
    pub async fn check_finished_deferred(&self) -> Result<Vec<SubmissionId>, GradingError> {
        let waiting = self
            .retry
            .run("list waiting submissions", || async {
                Ok(self
                    .repos
                    .submissions
                    .submissions_with_status(GradingStatus::WaitingForDeferred)
                    .await?)
            })
            .await?;

        let mut finished = Vec::new();
        for id in waiting {
            if self.try_finish(id).await? {
                finished.push(id);
            }
        }
        if !finished.is_empty() {
            info!(count = finished.len(), "finished waiting submissions");
        }
        Ok(finished)
    }

    async fn settle(
        &self,
        submission_id: SubmissionId,
        outcome: Result<GradeOutcome, GradingError>,
    ) -> Result<GradeOutcome, GradingError> {
        match outcome {
            Err(err) if err.is_integrity_race() => {
                info!(submission_id, reason = %err, "grading aborted");
                Ok(GradeOutcome::Aborted)
            }
            Err(err) => {
                self.mark_error(submission_id, &err).await;
                Err(err)
            }
            ok => ok,
        }
    }

    async fn grade_inline_units(&self, id: SubmissionId) -> Result<GradeOutcome, GradingError> {
        let started = self
            .retry
            .run("mark being graded", || {
                self.status.transition(id, GradingStatus::BeingGraded)
            })
            .await?;
        if let TransitionOutcome::Discarded { current } = started {
            info!(submission_id = id, status = %current, "submission not gradable");
            return Ok(GradeOutcome::Skipped { status: current });
        }

        let submission = self.load_submission(id).await?;
        let units = self.load_units(&submission.project_id).await?;
        let files = self.load_project_files(&submission.project_id).await?;

        for unit in units.iter().filter(|unit| !unit.deferred) {
            self.ensure_not_removed(id).await?;
            let saved = self
                .retry
                .run("grade unit", || {
                    self.pipeline.grade_and_persist(unit, &submission, &files)
                })
                .await?;
            if saved.is_none() {
                debug!(unit_id = unit.id, "unit deleted while grading");
            }
        }

        let guard = self.status.lock(id).await;
        let pending = self.pending_deferred(id, &units).await?;
        let target = if pending.is_empty() {
            GradingStatus::FinishedGrading
        } else {
            GradingStatus::WaitingForDeferred
        };
        let committed = self
            .retry
            .run("commit status", || self.status.transition(id, target))
            .await?;

        if let TransitionOutcome::Discarded { current } = committed {
            if current == GradingStatus::RemovedFromQueue {
                return Err(GradingError::Aborted(AbortReason::RemovedFromQueue(id)));
            }
            return Ok(GradeOutcome::Skipped { status: current });
        }
        // neither status can be cancelled any more
        self.refresh_score(id, &units, &files).await?;
        drop(guard);

        if pending.is_empty() {
            return Ok(GradeOutcome::Finished);
        }
        for unit_id in pending {
            self.schedule_deferred_unit(unit_id, id)?;
        }
        Ok(GradeOutcome::WaitingForDeferred)
    }

    async fn grade_deferred(
        &self,
        unit_id: UnitId,
        submission_id: SubmissionId,
    ) -> Result<GradeOutcome, GradingError> {
        let submission = self.load_submission(submission_id).await?;
        if submission.status == GradingStatus::RemovedFromQueue {
            return Err(GradingError::Aborted(AbortReason::RemovedFromQueue(submission_id)));
        }

        let unit = self
            .retry
            .run("load unit", || async {
                match self.repos.units.get_unit(unit_id).await {
                    Ok(unit) => Ok(Some(unit)),
                    Err(StoreError::NotFound { .. }) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await?;

        match unit {
            Some(unit) => {
                let files = self.load_project_files(&submission.project_id).await?;
                self.retry
                    .run("grade deferred unit", || {
                        self.pipeline.grade_and_persist(&unit, &submission, &files)
                    })
                    .await?;
            }
            // the submission must not wait on a unit that no longer exists
            None => warn!(unit_id, "deferred unit deleted before grading"),
        }

        if self.try_finish(submission_id).await? {
            Ok(GradeOutcome::Finished)
        } else {
            Ok(GradeOutcome::DeferredGraded)
        }
    }

    /// Finish a waiting submission once every deferred unit has a result.
    /// Decided under the submission's lock, so it cannot interleave with
    /// the inline job choosing between waiting and finished.
    async fn try_finish(&self, id: SubmissionId) -> Result<bool, GradingError> {
        let _guard = self.status.lock(id).await;

        let submission = self.load_submission(id).await?;
        if submission.status != GradingStatus::WaitingForDeferred {
            return Ok(false);
        }
        let units = self.load_units(&submission.project_id).await?;
        if !self.pending_deferred(id, &units).await?.is_empty() {
            return Ok(false);
        }

        let files = self.load_project_files(&submission.project_id).await?;
        self.refresh_score(id, &units, &files).await?;
        let finished = self
            .retry
            .run("finish submission", || {
                self.status.transition(id, GradingStatus::FinishedGrading)
            })
            .await?;
        Ok(finished.is_applied())
    }

    /// Deferred units of the project without a persisted result.
    async fn pending_deferred(
        &self,
        id: SubmissionId,
        units: &[GradableUnit],
    ) -> Result<Vec<UnitId>, GradingError> {
        let results = self
            .retry
            .run("load results", || async {
                Ok(self.repos.results.results_for_submission(id).await?)
            })
            .await?;
        let graded: HashSet<UnitId> = results.iter().map(|result| result.unit_id()).collect();
        Ok(units
            .iter()
            .filter(|unit| unit.deferred && !graded.contains(&unit.id))
            .map(|unit| unit.id)
            .collect())
    }

    /// Recompute the submission's score from every persisted result,
    /// counting all points regardless of what students may see.
    async fn refresh_score(
        &self,
        id: SubmissionId,
        units: &[GradableUnit],
        files: &[SandboxFile],
    ) -> Result<(), GradingError> {
        let results = self
            .retry
            .run("load results", || async {
                Ok(self.repos.results.results_for_submission(id).await?)
            })
            .await?;
        let scoring = ResolvedFeedbackConfig::scoring();

        let score: u32 = results
            .iter()
            .filter_map(|result| {
                let unit = units.iter().find(|unit| unit.id == result.unit_id())?;
                UnitFeedback::new(unit, result, &scoring.config, files)
            })
            .map(|feedback| feedback.total_points())
            .sum();

        self.retry
            .run("set basic score", || async {
                Ok(self.repos.submissions.set_basic_score(id, score).await?)
            })
            .await?;
        debug!(submission_id = id, score, "basic score updated");
        Ok(())
    }

    /// Best effort: the grading failure is what the caller sees.
    async fn mark_error(&self, id: SubmissionId, err: &GradingError) {
        error!(submission_id = id, error = %err, "grading failed");
        if let Err(record_err) = self.record_error(id, err.to_string()).await {
            error!(submission_id = id, error = %record_err, "could not record grading failure");
        }
    }

    async fn record_error(&self, id: SubmissionId, diagnostic: String) -> Result<(), GradingError> {
        let outcome = self.status.transition(id, GradingStatus::Error).await?;
        if outcome.is_applied() {
            self.repos.submissions.set_basic_score(id, 0).await?;
            self.repos
                .submissions
                .set_error_diagnostic(id, Some(diagnostic))
                .await?;
        }
        Ok(())
    }

    async fn ensure_not_removed(&self, id: SubmissionId) -> Result<(), GradingError> {
        let status = self
            .retry
            .run("check status", || self.status.current(id))
            .await?;
        if status == GradingStatus::RemovedFromQueue {
            return Err(GradingError::Aborted(AbortReason::RemovedFromQueue(id)));
        }
        Ok(())
    }

    async fn load_submission(&self, id: SubmissionId) -> Result<Submission, GradingError> {
        self.retry
            .run("load submission", || async {
                Ok(self.repos.submissions.get_submission(id).await?)
            })
            .await
    }

    async fn load_units(&self, project_id: &str) -> Result<Vec<GradableUnit>, GradingError> {
        self.retry
            .run("load units", || async {
                Ok(self.repos.units.units_for_project(project_id).await?)
            })
            .await
    }

    async fn load_project_files(&self, project_id: &str) -> Result<Vec<SandboxFile>, GradingError> {
        self.retry
            .run("load project files", || async {
                Ok(self.repos.units.project_files(project_id).await?)
            })
            .await
    }
}

impl<B: SandboxBackend + 'static> Dispatcher<B> {
    /// Drain `jobs` with `count` concurrent workers. Workers exit once
    /// every sender, including the dispatcher's own, is gone.
    pub fn spawn_workers(
        self: &Arc<Self>,
        jobs: JobReceiver,
        count: usize,
    ) -> Vec<JoinHandle<()>> {
        let jobs = Arc::new(Mutex::new(jobs));
        (0..count)
            .map(|worker| {
                let dispatcher = Arc::clone(self);
                let jobs = Arc::clone(&jobs);
                tokio::spawn(async move {
                    loop {
                        let next = jobs.lock().await.recv().await;
                        let Some(job) = next else { break };
                        match dispatcher.run_job(job).await {
                            Ok(outcome) => debug!(worker, ?job, ?outcome, "job done"),
                            Err(err) => error!(worker, ?job, error = %err, "job failed"),
                        }
                    }
                    debug!(worker, "grading queue closed");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::alert::AlertSink;
    use crate::config::Config;
    use crate::sandbox::SandboxManager;
    use crate::store::{MemoryStore, SubmissionRepository};
    use crate::testing::{FakeBackend, RecordingAlertSink, Reply, scored_unit};

    struct Fixture {
        backend: FakeBackend,
        store: Arc<MemoryStore>,
        dispatcher: Dispatcher<FakeBackend>,
        jobs: JobReceiver,
    }

    impl Fixture {
        fn new(backend: FakeBackend, units: Vec<GradableUnit>, max_retries: u32) -> Self {
            let store = Arc::new(MemoryStore::new());
            store.insert_project("p1", units, Vec::new());
            let alerts: Arc<dyn AlertSink> = Arc::new(RecordingAlertSink::default());
            let pipeline = Pipeline::new(
                SandboxManager::new(backend.clone(), alerts),
                &Config::default(),
                store.clone(),
            );
            let (dispatcher, jobs) = Dispatcher::new(
                Repositories::from_store(store.clone()),
                pipeline,
                RetryPolicy::new(max_retries, Duration::ZERO),
            );
            Self {
                backend,
                store,
                dispatcher,
                jobs,
            }
        }

        fn submit(&self) -> SubmissionId {
            self.store
                .create_submission("p1", vec!["ada".into()], Vec::new())
        }

        fn submission(&self, id: SubmissionId) -> Submission {
            self.store.submission(id).unwrap()
        }

        /// Run every queued job, including jobs those jobs queue.
        async fn drain(&mut self) -> Vec<GradeOutcome> {
            let mut outcomes = Vec::new();
            while let Ok(job) = self.jobs.try_recv() {
                outcomes.push(self.dispatcher.run_job(job).await.unwrap());
            }
            outcomes
        }
    }

    #[tokio::test]
    async fn no_deferred_units_finishes_directly() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, false)],
            3,
        );
        let id = f.submit();

        let outcome = f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(outcome, GradeOutcome::Finished);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::FinishedGrading);
        assert_eq!(submission.basic_score, 2);
        assert!(f.drain().await.is_empty());
    }

    #[tokio::test]
    async fn deferred_units_wait_then_finish() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true), scored_unit(3, true)],
            3,
        );
        let id = f.submit();

        let outcome = f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(outcome, GradeOutcome::WaitingForDeferred);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::WaitingForDeferred);
        assert_eq!(submission.basic_score, 1);

        let outcomes = f.drain().await;
        assert_eq!(outcomes, [GradeOutcome::DeferredGraded, GradeOutcome::Finished]);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::FinishedGrading);
        assert_eq!(submission.basic_score, 3);
    }

    #[tokio::test]
    async fn all_units_deferred() {
        let mut f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, true)], 3);
        let id = f.submit();

        assert_eq!(
            f.dispatcher.grade_submission(id).await.unwrap(),
            GradeOutcome::WaitingForDeferred
        );
        assert_eq!(f.submission(id).basic_score, 0);
        assert_eq!(f.drain().await, [GradeOutcome::Finished]);
        assert_eq!(f.submission(id).basic_score, 1);
    }

    #[tokio::test]
    async fn sweep_finishes_waiting_submissions() {
        let mut f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, true)], 3);
        let id = f.submit();
        f.dispatcher.grade_submission(id).await.unwrap();

        // not done yet
        assert!(f.dispatcher.check_finished_deferred().await.unwrap().is_empty());

        // a worker graded the unit but died before finishing the submission
        let job = f.jobs.try_recv().unwrap();
        let GradingJob::DeferredUnit { unit_id, .. } = job else {
            panic!("expected a deferred unit job");
        };
        let unit = f.dispatcher.repos.units.get_unit(unit_id).await.unwrap();
        let submission = f.submission(id);
        f.dispatcher
            .pipeline()
            .grade_and_persist(&unit, &submission, &[])
            .await
            .unwrap();

        assert_eq!(f.dispatcher.check_finished_deferred().await.unwrap(), [id]);
        assert_eq!(f.submission(id).status, GradingStatus::FinishedGrading);
        // idempotent
        assert!(f.dispatcher.check_finished_deferred().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deferred_result_before_inline_commit_finishes_directly() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true)],
            3,
        );
        let id = f.submit();
        f.dispatcher
            .status()
            .transition(id, GradingStatus::BeingGraded)
            .await
            .unwrap();

        // redelivered deferred job lands while the submission is being graded
        assert_eq!(
            f.dispatcher.grade_deferred_unit(2, id).await.unwrap(),
            GradeOutcome::DeferredGraded
        );
        assert_eq!(
            f.dispatcher.grade_submission(id).await.unwrap(),
            GradeOutcome::Finished
        );
        assert!(f.drain().await.is_empty());
        assert_eq!(f.submission(id).basic_score, 2);
    }

    #[tokio::test]
    async fn concurrent_deferred_jobs_finish_exactly_once() {
        let f = Fixture::new(
            FakeBackend::new().on("./test_", Reply::ok().after(Duration::from_millis(5))),
            vec![scored_unit(1, true), scored_unit(2, true), scored_unit(3, true)],
            3,
        );
        let id = f.submit();
        f.dispatcher.grade_submission(id).await.unwrap();

        let (a, b, c, sweep) = tokio::join!(
            f.dispatcher.grade_deferred_unit(1, id),
            f.dispatcher.grade_deferred_unit(2, id),
            f.dispatcher.grade_deferred_unit(3, id),
            f.dispatcher.check_finished_deferred(),
        );
        let finished = [a.unwrap(), b.unwrap(), c.unwrap()]
            .into_iter()
            .filter(|outcome| *outcome == GradeOutcome::Finished)
            .count()
            + sweep.unwrap().len();
        assert_eq!(finished, 1);
        assert_eq!(f.submission(id).status, GradingStatus::FinishedGrading);
    }

    #[tokio::test]
    async fn removed_before_grading_stays_removed() {
        let f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, false)], 3);
        let id = f.submit();
        f.dispatcher.status().remove_from_queue(id).await.unwrap();

        let outcome = f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(
            outcome,
            GradeOutcome::Skipped {
                status: GradingStatus::RemovedFromQueue
            }
        );
        assert_eq!(f.submission(id).status, GradingStatus::RemovedFromQueue);
        assert_eq!(f.backend.created(), 0);
    }

    #[tokio::test]
    async fn removed_while_grading_is_not_overwritten() {
        let f = Fixture::new(
            FakeBackend::new().on("./test_1", Reply::ok().after(Duration::from_millis(50))),
            vec![scored_unit(1, false), scored_unit(2, false)],
            3,
        );
        let id = f.submit();

        let cancel = async {
            while f.submission(id).status != GradingStatus::BeingGraded {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            f.dispatcher.status().remove_from_queue(id).await.unwrap();
        };
        let (outcome, ()) = tokio::join!(f.dispatcher.grade_submission(id), cancel);

        assert_eq!(outcome.unwrap(), GradeOutcome::Aborted);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::RemovedFromQueue);
        assert!(submission.error_diagnostic.is_none());
        assert_eq!(submission.basic_score, 0);
        // unit 2 never started
        assert_eq!(f.backend.created(), 1);
    }

    #[tokio::test]
    async fn removed_during_last_unit_keeps_no_score() {
        let f = Fixture::new(
            FakeBackend::new().on("./test_1", Reply::ok().after(Duration::from_millis(50))),
            vec![scored_unit(1, false)],
            3,
        );
        let id = f.submit();

        let cancel = async {
            while f.submission(id).status != GradingStatus::BeingGraded {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            f.dispatcher.status().remove_from_queue(id).await.unwrap();
        };
        let (outcome, ()) = tokio::join!(f.dispatcher.grade_submission(id), cancel);

        assert_eq!(outcome.unwrap(), GradeOutcome::Aborted);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::RemovedFromQueue);
        assert_eq!(submission.basic_score, 0);
        // the unit's result is kept; only the submission's outcome is withheld
        assert!(f.store.result(1, id).is_some());
    }

    #[tokio::test]
    async fn redelivered_job_leaves_waiting_submission_alone() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true)],
            3,
        );
        let id = f.submit();

        assert_eq!(
            f.dispatcher.grade_submission(id).await.unwrap(),
            GradeOutcome::WaitingForDeferred
        );
        let again = f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(
            again,
            GradeOutcome::Skipped {
                status: GradingStatus::WaitingForDeferred
            }
        );
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::WaitingForDeferred);
        assert!(submission.error_diagnostic.is_none());

        assert_eq!(f.drain().await, [GradeOutcome::Finished]);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::FinishedGrading);
        assert_eq!(submission.basic_score, 2);
        // unit 1 was graded once
        assert_eq!(f.backend.created(), 2);
    }

    #[tokio::test]
    async fn redelivered_job_after_finishing_is_skipped() {
        let f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, false)], 3);
        let id = f.submit();

        f.dispatcher.grade_submission(id).await.unwrap();
        let again = f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(
            again,
            GradeOutcome::Skipped {
                status: GradingStatus::FinishedGrading
            }
        );
        assert_eq!(f.submission(id).basic_score, 1);
    }

    #[tokio::test]
    async fn transient_sandbox_failures_are_retried() {
        let backend = FakeBackend::new();
        backend.fail_creates(2);
        let f = Fixture::new(backend, vec![scored_unit(1, false)], 3);
        let id = f.submit();

        assert_eq!(
            f.dispatcher.grade_submission(id).await.unwrap(),
            GradeOutcome::Finished
        );
        assert_eq!(f.submission(id).basic_score, 1);
    }

    #[tokio::test]
    async fn retried_unit_persists_once() {
        let f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, false)], 3);
        let id = f.submit();
        f.store.fail_result_writes(2);

        f.dispatcher.grade_submission(id).await.unwrap();
        assert_eq!(f.store.result_count(), 1);
        assert_eq!(f.backend.created(), 3);
        assert_eq!(f.backend.destroyed(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_submission_errored() {
        let f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, false)],
            1,
        );
        let id = f.submit();
        f.store.fail_result_writes(100);

        let err = f.dispatcher.grade_submission(id).await.unwrap_err();
        assert!(matches!(err, GradingError::RetriesExhausted { attempts: 2, .. }));

        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::Error);
        assert_eq!(submission.basic_score, 0);
        assert!(submission.error_diagnostic.unwrap().contains("store contention"));
    }

    #[tokio::test]
    async fn backend_failure_is_fatal_without_retry() {
        let f = Fixture::new(
            FakeBackend::new().on("./test_1", Reply::backend_error()),
            vec![scored_unit(1, false)],
            3,
        );
        let id = f.submit();

        let err = f.dispatcher.grade_submission(id).await.unwrap_err();
        assert!(matches!(err, GradingError::Sandbox(_)));
        assert_eq!(f.backend.created(), 1);
        assert_eq!(f.submission(id).status, GradingStatus::Error);
    }

    #[tokio::test]
    async fn failing_deferred_unit_marks_error() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true)],
            1,
        );
        let id = f.submit();
        f.dispatcher.grade_submission(id).await.unwrap();
        f.store.fail_result_writes(100);

        let job = f.jobs.try_recv().unwrap();
        let err = f.dispatcher.run_job(job).await.unwrap_err();
        assert!(matches!(err, GradingError::RetriesExhausted { .. }));
        assert_eq!(f.submission(id).status, GradingStatus::Error);
    }

    #[tokio::test]
    async fn deleted_deferred_unit_does_not_block_finishing() {
        let mut f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true)],
            3,
        );
        let id = f.submit();
        f.dispatcher.grade_submission(id).await.unwrap();
        f.store.remove_unit(2);

        assert_eq!(f.drain().await, [GradeOutcome::Finished]);
        let submission = f.submission(id);
        assert_eq!(submission.status, GradingStatus::FinishedGrading);
        assert_eq!(submission.basic_score, 1);
    }

    #[tokio::test]
    async fn missing_submission_is_an_integrity_race() {
        let f = Fixture::new(FakeBackend::new(), vec![scored_unit(1, false)], 3);
        assert_eq!(
            f.dispatcher.grade_submission(404).await.unwrap(),
            GradeOutcome::Aborted
        );
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let f = Fixture::new(
            FakeBackend::new(),
            vec![scored_unit(1, false), scored_unit(2, true)],
            3,
        );
        let Fixture {
            store,
            dispatcher,
            jobs,
            ..
        } = f;
        let dispatcher = Arc::new(dispatcher);
        let workers = dispatcher.spawn_workers(jobs, 2);

        let ids: Vec<SubmissionId> = (0..4)
            .map(|_| store.create_submission("p1", Vec::new(), Vec::new()))
            .collect();
        for id in &ids {
            dispatcher.schedule_grading(*id).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let finished = store
                    .submissions_with_status(GradingStatus::FinishedGrading)
                    .await
                    .unwrap();
                if finished.len() == ids.len() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        drop(dispatcher);
        for worker in workers {
            worker.abort();
        }
    }
}
