//! Resource-bounded shell commands run inside a sandbox.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ResourceLimits;

/// Default wall clock limit in seconds.
pub const DEFAULT_TIME_LIMIT: u32 = 10;
/// Largest wall clock limit a command may request, in seconds.
pub const MAX_TIME_LIMIT: u32 = 90;
/// Default stack size limit in bytes.
pub const DEFAULT_STACK_SIZE_LIMIT: u64 = 10_000_000;
/// Largest stack size limit a command may request, in bytes.
pub const MAX_STACK_SIZE_LIMIT: u64 = 100_000_000;
/// Default virtual memory limit in bytes.
pub const DEFAULT_VIRTUAL_MEMORY_LIMIT: u64 = 500_000_000;
/// Default number of child processes a command may spawn.
pub const DEFAULT_PROCESS_SPAWN_LIMIT: u32 = 0;
/// Largest number of child processes a command may spawn.
pub const MAX_PROCESS_SPAWN_LIMIT: u32 = 150;

const SHELL: &str = "/bin/bash";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("cmd: command must not be empty")]
    EmptyCmd,

    #[error("time_limit: {0} is outside 1..={MAX_TIME_LIMIT}")]
    TimeLimit(u32),

    #[error("stack_size_limit: {0} is outside 1..={MAX_STACK_SIZE_LIMIT}")]
    StackSizeLimit(u64),

    #[error("virtual_memory_limit: must be at least 1")]
    VirtualMemoryLimit,

    #[error("process_spawn_limit: {0} exceeds {MAX_PROCESS_SPAWN_LIMIT}")]
    ProcessSpawnLimit(u32),
}

/// An instructor-defined command.
///
/// `cmd` is a shell command line; it runs as `/bin/bash -c <cmd>` so that
/// pipes, redirections and globbing behave the way instructors expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Human readable label
    #[serde(default)]
    pub name: String,

    pub cmd: String,

    /// Wall clock limit in seconds
    #[serde(default = "default_time_limit")]
    pub time_limit: u32,

    /// Stack size limit in bytes
    #[serde(default = "default_stack_size_limit")]
    pub stack_size_limit: u64,

    #[serde(default)]
    pub use_virtual_memory_limit: bool,

    /// Virtual memory limit in bytes, applied only when
    /// `use_virtual_memory_limit` is set
    #[serde(default = "default_virtual_memory_limit")]
    pub virtual_memory_limit: u64,

    /// Forbid spawning any child process regardless of `process_spawn_limit`
    #[serde(default)]
    pub block_process_spawn: bool,

    #[serde(default)]
    pub process_spawn_limit: u32,
}

impl Command {
    /// Create a command with default limits.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            cmd: cmd.into(),
            time_limit: DEFAULT_TIME_LIMIT,
            stack_size_limit: DEFAULT_STACK_SIZE_LIMIT,
            use_virtual_memory_limit: false,
            virtual_memory_limit: DEFAULT_VIRTUAL_MEMORY_LIMIT,
            block_process_spawn: false,
            process_spawn_limit: DEFAULT_PROCESS_SPAWN_LIMIT,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = seconds;
        self
    }

    pub fn with_virtual_memory_limit(mut self, bytes: u64) -> Self {
        self.use_virtual_memory_limit = true;
        self.virtual_memory_limit = bytes;
        self
    }

    pub fn with_process_spawn_limit(mut self, count: u32) -> Self {
        self.process_spawn_limit = count;
        self
    }

    /// Same limits, different command line.
    pub fn with_cmd(&self, cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        if self.cmd.trim().is_empty() {
            return Err(CommandError::EmptyCmd);
        }
        if !(1..=MAX_TIME_LIMIT).contains(&self.time_limit) {
            return Err(CommandError::TimeLimit(self.time_limit));
        }
        if !(1..=MAX_STACK_SIZE_LIMIT).contains(&self.stack_size_limit) {
            return Err(CommandError::StackSizeLimit(self.stack_size_limit));
        }
        if self.virtual_memory_limit < 1 {
            return Err(CommandError::VirtualMemoryLimit);
        }
        if self.process_spawn_limit > MAX_PROCESS_SPAWN_LIMIT {
            return Err(CommandError::ProcessSpawnLimit(self.process_spawn_limit));
        }
        Ok(())
    }

    /// Sandbox limits for this command. Only fields the command controls
    /// are set, so they layer over backend defaults with
    /// [`ResourceLimits::with_overrides`].
    pub fn resource_limits(&self) -> ResourceLimits {
        let spawn = if self.block_process_spawn {
            0
        } else {
            self.process_spawn_limit
        };

        let mut limits = ResourceLimits::unlimited()
            .with_wall_time_limit(f64::from(self.time_limit))
            .with_stack_limit(self.stack_size_limit.div_ceil(1024))
            // bash itself counts against the process limit
            .with_max_processes(spawn + 1);

        if self.use_virtual_memory_limit {
            limits = limits.with_memory_limit(self.virtual_memory_limit.div_ceil(1024));
        }
        limits
    }

    /// Argument vector executed inside the sandbox.
    pub fn argv(&self) -> Vec<String> {
        vec![SHELL.to_string(), "-c".to_string(), self.cmd.clone()]
    }
}

fn default_time_limit() -> u32 {
    DEFAULT_TIME_LIMIT
}

fn default_stack_size_limit() -> u64 {
    DEFAULT_STACK_SIZE_LIMIT
}

fn default_virtual_memory_limit() -> u64 {
    DEFAULT_VIRTUAL_MEMORY_LIMIT
}
