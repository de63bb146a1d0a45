use std::sync::Arc;

use gradebox::model::{GradingStatus, Project, UnitResult};
use gradebox::{
    Dispatcher, GradeOutcome, IsolateBackend, LogAlertSink, MemoryStore, Pipeline, Repositories,
    RetryPolicy, SandboxFile, SandboxManager,
};

use super::{fixture_path, test_config};

#[tokio::test]
#[ignore = "requires root"]
async fn test_grade_project_end_to_end() {
    let config = Arc::new(test_config());
    let project = Project::from_file(fixture_path("projects/echo/project.toml")).unwrap();
    let files = project.load_files().unwrap();

    let store = Arc::new(MemoryStore::new());
    store.insert_project(&project.id, project.units.clone(), files);
    let submission_id = store.create_submission(
        &project.id,
        vec!["ada".into()],
        vec![SandboxFile::new("README", "nothing to compile")],
    );

    let backend = IsolateBackend::new(config.clone()).expect("Failed to build backend");
    let pipeline = Pipeline::new(
        SandboxManager::new(backend, Arc::new(LogAlertSink)),
        &config,
        store.clone(),
    );
    let (dispatcher, mut jobs) = Dispatcher::new(
        Repositories::from_store(store.clone()),
        pipeline,
        RetryPolicy::from_config(&config.grading),
    );

    dispatcher.schedule_grading(submission_id).unwrap();
    let mut outcomes = Vec::new();
    while let Ok(job) = jobs.try_recv() {
        outcomes.push(dispatcher.run_job(job).await.expect("grading failed"));
    }
    assert_eq!(
        outcomes,
        [GradeOutcome::WaitingForDeferred, GradeOutcome::Finished]
    );

    let submission = store.submission(submission_id).unwrap();
    assert_eq!(submission.status, GradingStatus::FinishedGrading);
    assert_eq!(submission.basic_score, 6);

    let Some(UnitResult::TestCase(echo)) = store.result(1, submission_id) else {
        panic!("missing echo result");
    };
    assert_eq!(echo.run.as_ref().unwrap().stdout, b"hello gradebox\n");

    let Some(UnitResult::TestCase(exit)) = store.result(2, submission_id) else {
        panic!("missing exit code result");
    };
    assert_eq!(exit.run.as_ref().unwrap().return_code, 4);
}
