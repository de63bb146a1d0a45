//! Runs one [`Command`] in a live sandbox.

use tracing::{debug, instrument};

pub use crate::runner::log::{OutputLog, truncate};

mod log;

use crate::config::GradingConfig;
use crate::model::{Command, CompletedCommand};
use crate::sandbox::{CommandRequest, SandboxError, SandboxHandle};

/// Maps commands onto sandbox requests and enforces the output ceiling.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    output_ceiling: usize,
}

impl CommandRunner {
    pub fn new(output_ceiling: usize) -> Self {
        Self { output_ceiling }
    }

    pub fn from_config(config: &GradingConfig) -> Self {
        Self::new(config.output_ceiling)
    }

    pub fn output_ceiling(&self) -> usize {
        self.output_ceiling
    }

    /// Run `command` under its own limits.
    ///
    /// A nonzero exit or a timeout is a normal result. `Err` is reserved
    /// for backend failures, where the command produced nothing to trust.
    #[instrument(skip_all, fields(command = %command.name, sandbox_id = %handle.id()))]
    pub async fn run<H: SandboxHandle + ?Sized>(
        &self,
        handle: &mut H,
        command: &Command,
        stdin: Option<&[u8]>,
    ) -> Result<CompletedCommand, SandboxError> {
        let request = CommandRequest {
            argv: command.argv(),
            limits: command.resource_limits(),
            stdin: stdin.map(<[u8]>::to_vec),
            output_ceiling: self.output_ceiling,
        };
        debug!(cmd = %command.cmd, "running command");

        let mut completed = handle.run_command(&request).await?;
        // backends are not trusted to honour the ceiling
        completed.stdout_truncated |= truncate(&mut completed.stdout, self.output_ceiling);
        completed.stderr_truncated |= truncate(&mut completed.stderr, self.output_ceiling);

        debug!(
            return_code = completed.return_code,
            timed_out = completed.timed_out,
            stdout_truncated = completed.stdout_truncated,
            stderr_truncated = completed.stderr_truncated,
            "command finished"
        );
        Ok(completed)
    }
}
