use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SandboxFile;

pub type SubmissionId = u64;

/// Lifecycle of a submission. Only [`crate::status`] moves a submission
/// between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    Queued,
    BeingGraded,
    WaitingForDeferred,
    FinishedGrading,
    RemovedFromQueue,
    Error,
}

impl GradingStatus {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GradingStatus::FinishedGrading | GradingStatus::RemovedFromQueue | GradingStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradingStatus::Queued => "queued",
            GradingStatus::BeingGraded => "being_graded",
            GradingStatus::WaitingForDeferred => "waiting_for_deferred",
            GradingStatus::FinishedGrading => "finished_grading",
            GradingStatus::RemovedFromQueue => "removed_from_queue",
            GradingStatus::Error => "error",
        }
    }
}

impl fmt::Display for GradingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub project_id: String,
    /// Usernames of the owning group
    pub group_members: Vec<String>,
    pub files: Vec<SandboxFile>,
    pub status: GradingStatus,
    /// Points earned by the units graded so far
    pub basic_score: u32,
    /// Set when grading ends in [`GradingStatus::Error`]
    pub error_diagnostic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// A freshly uploaded submission, waiting in the queue.
    pub fn new(
        id: SubmissionId,
        project_id: impl Into<String>,
        group_members: Vec<String>,
        files: Vec<SandboxFile>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id: project_id.into(),
            group_members,
            files,
            status: GradingStatus::Queued,
            basic_score: 0,
            error_diagnostic: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Value of the `usernames` variable in the grading sandbox.
    pub fn usernames(&self) -> String {
        self.group_members.join(" ")
    }
}
