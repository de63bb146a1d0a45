//! Byte ceilings for captured output.

use serde::{Deserialize, Serialize};

/// Cut `bytes` down to `ceiling`. Returns whether anything was removed.
pub fn truncate(bytes: &mut Vec<u8>, ceiling: usize) -> bool {
    if bytes.len() > ceiling {
        bytes.truncate(ceiling);
        true
    } else {
        false
    }
}

/// Stdout and stderr accumulated across many commands, bounded by a
/// ceiling per stream. Once a stream hits the ceiling further writes to
/// it are dropped and the stream is flagged as truncated. The ceiling is
/// stored with the log, so a reloaded log stays bounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLog {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(default)]
    ceiling: usize,
}

impl OutputLog {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            ..Default::default()
        }
    }

    /// Write the same text to both streams.
    pub fn separator(&mut self, text: &str) {
        self.push_stdout(text.as_bytes());
        self.push_stderr(text.as_bytes());
    }

    pub fn push_stdout(&mut self, bytes: &[u8]) {
        self.stdout_truncated |= append_bounded(&mut self.stdout, bytes, self.ceiling);
    }

    pub fn push_stderr(&mut self, bytes: &[u8]) {
        self.stderr_truncated |= append_bounded(&mut self.stderr, bytes, self.ceiling);
    }
}

fn append_bounded(buf: &mut Vec<u8>, bytes: &[u8], ceiling: usize) -> bool {
    let room = ceiling.saturating_sub(buf.len());
    if bytes.len() > room {
        buf.extend_from_slice(&bytes[..room]);
        true
    } else {
        buf.extend_from_slice(bytes);
        false
    }
}
