//! Isolate meta files: `key:value` lines written after every `--run`.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::isolate::IsolateError;
use crate::types::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("meta file line {line_number}: {message} ({line:?})")]
pub struct MetaParseError {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct MetaFile {
    entries: HashMap<String, String>,
}

impl MetaFile {
    /// Parse meta file content. Blank lines are skipped; any other line
    /// without a `key:` prefix is an error.
    pub fn parse(content: &str) -> Result<Self, MetaParseError> {
        let mut entries = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let error = |message: &str| MetaParseError {
                line_number: idx + 1,
                line: line.to_string(),
                message: message.to_string(),
            };
            let (key, value) = line.split_once(':').ok_or_else(|| error("missing colon"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(error("empty key"));
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { entries })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::parse(&content).map_err(|e| IsolateError::MetaParseFailed(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Isolate omits `status` when the program exited with code 0.
    pub fn status(&self) -> ExecutionStatus {
        self.get("status")
            .map_or(ExecutionStatus::Ok, ExecutionStatus::from_isolate_status)
    }

    pub fn timed_out(&self) -> bool {
        self.status() == ExecutionStatus::TimedOut
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.parsed("exitcode")
    }

    pub fn signal(&self) -> Option<i32> {
        self.parsed("exitsig")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("message")
    }

    /// CPU seconds
    pub fn time(&self) -> Option<f64> {
        self.parsed("time")
    }

    pub fn wall_time(&self) -> Option<f64> {
        self.parsed("time-wall")
    }

    /// Shell-style return code: the exit code, `128 + signal` for a
    /// signalled program and `-1` when neither is known (a timeout kill).
    pub fn return_code(&self) -> i32 {
        match (self.exit_code(), self.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) if self.status() == ExecutionStatus::Ok => 0,
            (None, None) => -1,
        }
    }
}
