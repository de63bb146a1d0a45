//! Ordinary tests: compile, run, then an optional memory-checker pass.

use tracing::debug;

use crate::error::GradingError;
use crate::model::{
    CompletedCommand, StdinSource, SubmissionId, TestCaseResult, TestCaseSpec, UnitId,
};
use crate::runner::CommandRunner;
use crate::sandbox::SandboxHandle;
use crate::types::SandboxFile;

pub(super) async fn grade<H: SandboxHandle + ?Sized>(
    runner: &CommandRunner,
    handle: &mut H,
    unit_id: UnitId,
    submission_id: SubmissionId,
    spec: &TestCaseSpec,
    project_files: &[SandboxFile],
) -> Result<TestCaseResult, GradingError> {
    let mut result = TestCaseResult::new(unit_id, submission_id);

    if let Some(compile) = &spec.compile {
        let completed = runner.run(handle, compile, None).await?;
        let failed = !completed.succeeded();
        result.compile = Some(completed);
        if failed {
            debug!(unit_id, "compilation failed, skipping run");
            return Ok(result);
        }
    }

    let stdin = stdin_bytes(unit_id, &spec.stdin, result.compile.as_ref(), project_files)?;
    result.run = Some(runner.run(handle, &spec.run, stdin.as_deref()).await?);

    if let Some(checker) = &spec.memory_checker {
        let checked = spec
            .run
            .with_cmd(format!("{} {}", checker.command_prefix, spec.run.cmd));
        result.memory_checker = Some(runner.run(handle, &checked, stdin.as_deref()).await?);
    }

    Ok(result)
}

fn stdin_bytes(
    unit_id: UnitId,
    source: &StdinSource,
    compile: Option<&CompletedCommand>,
    project_files: &[SandboxFile],
) -> Result<Option<Vec<u8>>, GradingError> {
    let bytes = match source {
        StdinSource::None => return Ok(None),
        StdinSource::Text(text) => text.as_bytes().to_vec(),
        StdinSource::InstructorFile(name) => project_files
            .iter()
            .find(|file| file.name == *name)
            .map(|file| file.content.clone())
            .ok_or_else(|| GradingError::MissingInstructorFile {
                unit_id,
                name: name.clone(),
            })?,
        StdinSource::CompileStdout => compile.map(|c| c.stdout.clone()).unwrap_or_default(),
        StdinSource::CompileStderr => compile.map(|c| c.stderr.clone()).unwrap_or_default(),
    };
    Ok(Some(bytes))
}
