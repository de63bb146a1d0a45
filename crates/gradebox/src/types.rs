use serde::{Deserialize, Serialize};

/// Resource limits handed to the sandbox for a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Address space limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads, including the command itself
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum size of any file written inside the sandbox, in kilobytes
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,

    /// Grace period before a timed out command is killed, in seconds
    #[serde(default)]
    pub extra_time: Option<f64>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Limits with every field unset.
    pub fn unlimited() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_file_size: None,
            max_open_files: None,
            extra_time: None,
        }
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the address space limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
            extra_time: overrides.extra_time.or(self.extra_time),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: Some(10.0),
            memory_limit: None,
            stack_limit: Some(10 * Self::MB),
            max_processes: Some(1),
            max_file_size: Some(64 * Self::MB),
            max_open_files: Some(64),
            extra_time: Some(0.5),
        }
    }
}

/// Exit status reported by isolate in the meta file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Program exited normally
    #[serde(rename = "OK")]
    Ok,

    /// Program exited with a non-zero code
    #[serde(rename = "RE")]
    RuntimeError,

    /// Time limit exceeded
    #[serde(rename = "TO")]
    TimedOut,

    /// Program was killed by a signal
    #[serde(rename = "SG")]
    Signaled,

    /// Isolate itself failed
    #[serde(rename = "XX")]
    InternalError,
}

impl ExecutionStatus {
    /// Parse status from isolate meta file status string
    pub fn from_isolate_status(status: &str) -> Self {
        match status {
            "OK" => ExecutionStatus::Ok,
            "RE" => ExecutionStatus::RuntimeError,
            "TO" => ExecutionStatus::TimedOut,
            "SG" => ExecutionStatus::Signaled,
            _ => ExecutionStatus::InternalError,
        }
    }
}

/// Configuration for a directory mount in Isolate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Maps to isolate's `:maybe` flag
    #[serde(default)]
    pub optional: bool,
}

/// A named file copied into a sandbox before any command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl SandboxFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_cover_grading_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.wall_time_limit, Some(10.0));
        assert_eq!(limits.stack_limit, Some(10 * ResourceLimits::MB));
        assert_eq!(limits.max_processes, Some(1));
        assert!(limits.memory_limit.is_none());
    }

    #[test]
    fn with_overrides_unlimited_preserves_base() {
        let base = ResourceLimits::default();
        let result = base.with_overrides(&ResourceLimits::unlimited());
        assert_eq!(result, base);
    }

    #[test]
    fn with_overrides_partial_override() {
        let base = ResourceLimits::default();
        let overrides = ResourceLimits::unlimited()
            .with_wall_time_limit(3.0)
            .with_max_processes(5);

        let result = base.with_overrides(&overrides);
        assert_eq!(result.wall_time_limit, Some(3.0));
        assert_eq!(result.max_processes, Some(5));
        assert_eq!(result.stack_limit, base.stack_limit);
        assert_eq!(result.max_file_size, base.max_file_size);
    }

    #[test]
    fn execution_status_from_isolate_status() {
        assert_eq!(
            ExecutionStatus::from_isolate_status("OK"),
            ExecutionStatus::Ok
        );
        assert_eq!(
            ExecutionStatus::from_isolate_status("RE"),
            ExecutionStatus::RuntimeError
        );
        assert_eq!(
            ExecutionStatus::from_isolate_status("TO"),
            ExecutionStatus::TimedOut
        );
        assert_eq!(
            ExecutionStatus::from_isolate_status("SG"),
            ExecutionStatus::Signaled
        );
        assert_eq!(
            ExecutionStatus::from_isolate_status("XX"),
            ExecutionStatus::InternalError
        );
    }

    #[test]
    fn unknown_status_is_internal_error() {
        assert_eq!(
            ExecutionStatus::from_isolate_status("ok"),
            ExecutionStatus::InternalError
        );
        assert_eq!(
            ExecutionStatus::from_isolate_status(""),
            ExecutionStatus::InternalError
        );
    }
}
