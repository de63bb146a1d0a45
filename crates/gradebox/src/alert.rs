//! Out-of-band operator alerts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// A sandbox whose resource state is unknown after a failed teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxAlert {
    pub severity: Severity,
    pub sandbox_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl SandboxAlert {
    pub fn teardown_failed(sandbox_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            severity: Severity::Critical,
            sandbox_id: sandbox_id.into(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: SandboxAlert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: SandboxAlert) {
        match alert.severity {
            Severity::Critical => error!(
                sandbox_id = %alert.sandbox_id,
                error = %alert.error,
                at = %alert.at,
                "sandbox alert"
            ),
            Severity::Warning => warn!(
                sandbox_id = %alert.sandbox_id,
                error = %alert.error,
                at = %alert.at,
                "sandbox alert"
            ),
        }
    }
}
