//! Raw grading results. Written once per (unit, submission) pair and
//! replaced wholesale on regrade.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::submission::SubmissionId;
use crate::model::unit::UnitId;
use crate::runner::OutputLog;

/// Outcome of one command run in a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedCommand {
    pub return_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl CompletedCommand {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub unit_id: UnitId,
    pub submission_id: SubmissionId,
    pub compile: Option<CompletedCommand>,
    /// Absent when compilation failed
    pub run: Option<CompletedCommand>,
    pub memory_checker: Option<CompletedCommand>,
}

impl TestCaseResult {
    pub fn new(unit_id: UnitId, submission_id: SubmissionId) -> Self {
        Self {
            unit_id,
            submission_id,
            compile: None,
            run: None,
            memory_checker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationSuiteResult {
    pub unit_id: UnitId,
    pub submission_id: SubmissionId,
    pub setup: Option<CompletedCommand>,
    pub get_test_names: Option<CompletedCommand>,
    /// Discovered test names that were considered, in discovery order
    pub student_tests: Vec<String>,
    /// Discovered names past the configured maximum
    pub discarded_tests: Vec<String>,
    pub invalid_tests: Vec<String>,
    /// Independent of `invalid_tests`; a test may appear in both
    pub timed_out_tests: Vec<String>,
    pub bugs_exposed: Vec<String>,
    pub validity_check_log: OutputLog,
    pub grade_buggy_impls_log: OutputLog,
}

impl MutationSuiteResult {
    pub fn new(unit_id: UnitId, submission_id: SubmissionId) -> Self {
        Self {
            unit_id,
            submission_id,
            setup: None,
            get_test_names: None,
            student_tests: Vec::new(),
            discarded_tests: Vec::new(),
            invalid_tests: Vec::new(),
            timed_out_tests: Vec::new(),
            bugs_exposed: Vec::new(),
            validity_check_log: OutputLog::default(),
            grade_buggy_impls_log: OutputLog::default(),
        }
    }

    /// Student tests that passed the validity check, in discovery order.
    pub fn valid_tests(&self) -> Vec<String> {
        let invalid: HashSet<&str> = self.invalid_tests.iter().map(String::as_str).collect();
        self.student_tests
            .iter()
            .filter(|name| !invalid.contains(name.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitResult {
    TestCase(TestCaseResult),
    MutationSuite(MutationSuiteResult),
}

impl UnitResult {
    pub fn unit_id(&self) -> UnitId {
        match self {
            UnitResult::TestCase(result) => result.unit_id,
            UnitResult::MutationSuite(result) => result.unit_id,
        }
    }

    pub fn submission_id(&self) -> SubmissionId {
        match self {
            UnitResult::TestCase(result) => result.submission_id,
            UnitResult::MutationSuite(result) => result.submission_id,
        }
    }

    pub fn key(&self) -> (UnitId, SubmissionId) {
        (self.unit_id(), self.submission_id())
    }
}
