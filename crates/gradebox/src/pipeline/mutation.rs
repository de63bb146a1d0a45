//! Mutation testing suites: find the student's tests, check that each is
//! valid against the correct implementation, then count the buggy
//! implementations the valid tests expose.

use tracing::{debug, info};

use crate::error::GradingError;
use crate::model::{
    ALL_VALID_TEST_NAMES_PLACEHOLDER, BUGGY_IMPL_NAME_PLACEHOLDER, Command, MutationSuiteResult,
    MutationSuiteSpec, STUDENT_TEST_NAME_PLACEHOLDER, SubmissionId, UnitId,
};
use crate::runner::{CommandRunner, OutputLog};
use crate::sandbox::SandboxHandle;

pub(super) async fn grade<H: SandboxHandle + ?Sized>(
    runner: &CommandRunner,
    handle: &mut H,
    unit_id: UnitId,
    submission_id: SubmissionId,
    spec: &MutationSuiteSpec,
    log_ceiling: usize,
) -> Result<MutationSuiteResult, GradingError> {
    let mut result = MutationSuiteResult::new(unit_id, submission_id);
    result.validity_check_log = OutputLog::new(log_ceiling);
    result.grade_buggy_impls_log = OutputLog::new(log_ceiling);

    if let Some(setup) = &spec.setup {
        let completed = runner.run(handle, setup, None).await?;
        let failed = !completed.succeeded();
        result.setup = Some(completed);
        if failed {
            info!(unit_id, submission_id, "setup failed, suite stopped");
            return Ok(result);
        }
    }

    let discovery = runner.run(handle, &spec.get_student_test_names, None).await?;
    let names = spec.test_name_split.split(&discovery.stdout_text());
    let failed = !discovery.succeeded();
    result.get_test_names = Some(discovery);
    if failed {
        info!(unit_id, submission_id, "test name discovery failed, suite stopped");
        return Ok(result);
    }

    let (kept, discarded) = names.split_at(names.len().min(spec.max_num_student_tests));
    result.student_tests = kept.to_vec();
    result.discarded_tests = discarded.to_vec();
    debug!(
        found = names.len(),
        discarded = result.discarded_tests.len(),
        "student tests discovered"
    );

    check_validity(runner, handle, spec, &mut result).await?;
    expose_bugs(runner, handle, spec, &mut result).await?;

    info!(
        unit_id,
        submission_id,
        invalid = result.invalid_tests.len(),
        bugs_exposed = result.bugs_exposed.len(),
        "mutation suite graded"
    );
    Ok(result)
}

async fn check_validity<H: SandboxHandle + ?Sized>(
    runner: &CommandRunner,
    handle: &mut H,
    spec: &MutationSuiteSpec,
    result: &mut MutationSuiteResult,
) -> Result<(), GradingError> {
    for test in &result.student_tests {
        let command = spec.student_test_validity_check.with_cmd(
            spec.student_test_validity_check
                .cmd
                .replace(STUDENT_TEST_NAME_PLACEHOLDER, test),
        );
        let completed = runner.run(handle, &command, None).await?;

        let log = &mut result.validity_check_log;
        log.separator(&format!("\n------ {test} ------\n"));
        log.push_stdout(&completed.stdout);
        log.push_stderr(&completed.stderr);

        if !completed.succeeded() {
            result.invalid_tests.push(test.clone());
        }
        if completed.timed_out {
            result.timed_out_tests.push(test.clone());
        }
    }
    Ok(())
}

async fn expose_bugs<H: SandboxHandle + ?Sized>(
    runner: &CommandRunner,
    handle: &mut H,
    spec: &MutationSuiteSpec,
    result: &mut MutationSuiteResult,
) -> Result<(), GradingError> {
    let valid_tests = result.valid_tests();
    let template = &spec.grade_buggy_impl.cmd;

    for bug in &spec.buggy_impl_names {
        if result.bugs_exposed.contains(bug) {
            continue;
        }
        let with_bug = template.replace(BUGGY_IMPL_NAME_PLACEHOLDER, bug);

        let exposed = if spec.grades_individual_tests() {
            let mut exposed = false;
            for test in &valid_tests {
                let command = spec
                    .grade_buggy_impl
                    .with_cmd(with_bug.replace(STUDENT_TEST_NAME_PLACEHOLDER, test));
                let separator = format!("\n----- Bug \"{bug}\" with Test \"{test}\" -----\n");
                if !run_logged(runner, handle, &command, &separator, result).await? {
                    exposed = true;
                    break;
                }
            }
            exposed
        } else {
            let all_tests = valid_tests
                .iter()
                .map(|test| format!("\"{test}\""))
                .collect::<Vec<_>>()
                .join(" ");
            let command = spec
                .grade_buggy_impl
                .with_cmd(with_bug.replace(ALL_VALID_TEST_NAMES_PLACEHOLDER, &all_tests));
            let separator = format!("\n----- Bug \"{bug}\" with all_valid_tests -----\n");
            !run_logged(runner, handle, &command, &separator, result).await?
        };

        if exposed {
            debug!(bug = %bug, "bug exposed");
            result.bugs_exposed.push(bug.clone());
        }
    }
    Ok(())
}

/// Run one bug exposure command into the suite's log. Returns whether
/// it exited zero.
async fn run_logged<H: SandboxHandle + ?Sized>(
    runner: &CommandRunner,
    handle: &mut H,
    command: &Command,
    separator: &str,
    result: &mut MutationSuiteResult,
) -> Result<bool, GradingError> {
    let completed = runner.run(handle, command, None).await?;
    let log = &mut result.grade_buggy_impls_log;
    log.separator(separator);
    log.push_stdout(&completed.stdout);
    log.push_stderr(&completed.stderr);
    Ok(completed.succeeded())
}
