//! Running one batch command inside a box.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::isolate::IsolateError;
use crate::isolate::box_manager::IsolateBox;
use crate::isolate::command::IsolateCommand;
use crate::isolate::meta::MetaFile;
use crate::runner::truncate;
use crate::types::ExecutionStatus;

const STDIN_FILE: &str = ".gradebox_stdin";
const STDOUT_FILE: &str = ".gradebox_stdout";
const STDERR_FILE: &str = ".gradebox_stderr";
const META_FILE: &str = "gradebox.meta";

/// Captured result of one `isolate --run`.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub meta: MetaFile,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Run `command` in `sandbox` with `stdin` as its input, keeping at most
/// `ceiling` bytes of each output stream.
///
/// Fails when isolate itself fails (no meta file, or status `XX`); a
/// program that crashes or times out is a normal result.
#[instrument(skip(sandbox, command, stdin), fields(box_id = sandbox.id()))]
pub async fn run_batch(
    sandbox: &IsolateBox,
    command: IsolateCommand,
    stdin: Option<&[u8]>,
    ceiling: usize,
) -> Result<BatchOutput, IsolateError> {
    let meta_path = sandbox.private_path(META_FILE);
    remove_if_present(&meta_path).await?;

    // isolate needs an existing file for --stdin
    sandbox.write_file(STDIN_FILE, stdin.unwrap_or_default()).await?;

    let args = command
        .meta_file(&meta_path)
        .redirect(
            sandbox.sandbox_path(STDIN_FILE)?,
            sandbox.sandbox_path(STDOUT_FILE)?,
            sandbox.sandbox_path(STDERR_FILE)?,
        )
        .build();
    debug!(?args, "running isolate command");

    let (program, rest) = args
        .split_first()
        .ok_or_else(|| IsolateError::CommandFailed("empty command arguments".to_string()))?;
    let output = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(IsolateError::SpawnFailed)?;

    if !meta_path.exists() {
        return Err(IsolateError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let meta = MetaFile::load(&meta_path).await?;
    if meta.status() == ExecutionStatus::InternalError {
        return Err(IsolateError::CommandFailed(
            meta.message().unwrap_or("isolate internal error").to_string(),
        ));
    }

    let stdout_path = sandbox.file_path(STDOUT_FILE)?;
    let stderr_path = sandbox.file_path(STDERR_FILE)?;
    let (stdout, stdout_truncated) = read_capped(&stdout_path, ceiling).await?;
    let (stderr, stderr_truncated) = read_capped(&stderr_path, ceiling).await?;
    for path in [sandbox.file_path(STDIN_FILE)?, stdout_path, stderr_path] {
        remove_if_present(&path).await?;
    }

    debug!(
        status = ?meta.status(),
        return_code = meta.return_code(),
        wall_time = meta.wall_time(),
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "command finished"
    );

    Ok(BatchOutput {
        meta,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

async fn read_capped(path: &Path, ceiling: usize) -> Result<(Vec<u8>, bool), IsolateError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.take(ceiling as u64 + 1).read_to_end(&mut bytes).await?;
    let truncated = truncate(&mut bytes, ceiling);
    Ok((bytes, truncated))
}

async fn remove_if_present(path: &Path) -> Result<(), IsolateError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
