//! Domain records consumed and produced by the grading engine.

pub use crate::model::command::{
    Command, CommandError, DEFAULT_PROCESS_SPAWN_LIMIT, DEFAULT_STACK_SIZE_LIMIT,
    DEFAULT_TIME_LIMIT, DEFAULT_VIRTUAL_MEMORY_LIMIT, MAX_PROCESS_SPAWN_LIMIT,
    MAX_STACK_SIZE_LIMIT, MAX_TIME_LIMIT,
};
pub use crate::model::project::{Project, ProjectFile};
pub use crate::model::result::{
    CompletedCommand, MutationSuiteResult, TestCaseResult, UnitResult,
};
pub use crate::model::submission::{GradingStatus, Submission, SubmissionId};
pub use crate::model::unit::{
    ALL_VALID_TEST_NAMES_PLACEHOLDER, BUGGY_IMPL_NAME_PLACEHOLDER, ExpectedOutput,
    ExpectedReturnCode, GradableUnit, MemoryChecker, MutationSuiteSpec,
    STUDENT_TEST_NAME_PLACEHOLDER, StdinSource, TestCaseSpec, TestNameSplit, TestPoints,
    UnitId, UnitKind,
};

mod command;
mod project;
mod result;
mod submission;
mod unit;
