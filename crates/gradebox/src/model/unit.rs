//! Gradable units: ordinary test cases and mutation testing suites.

use serde::{Deserialize, Serialize};

use crate::feedback::FeedbackSettings;
use crate::model::command::{Command, CommandError};

pub type UnitId = u64;

/// Replaced by the student test name in validity checks and per-test
/// bug exposure runs.
pub const STUDENT_TEST_NAME_PLACEHOLDER: &str = "${student_test_name}";
/// Replaced by the buggy implementation name in bug exposure runs.
pub const BUGGY_IMPL_NAME_PLACEHOLDER: &str = "${buggy_impl_name}";
/// Replaced by every valid student test name, each double-quoted.
pub const ALL_VALID_TEST_NAMES_PLACEHOLDER: &str = "${all_valid_test_names}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradableUnit {
    pub id: UnitId,
    pub name: String,

    /// Graded after the submission's other units, by a separate job
    #[serde(default)]
    pub deferred: bool,

    /// Sandbox image tag; the configured default image when unset
    #[serde(default)]
    pub sandbox_image: Option<String>,

    #[serde(default)]
    pub allow_network_access: bool,

    /// Names of project files copied into the sandbox
    #[serde(default)]
    pub instructor_files: Vec<String>,

    #[serde(default)]
    pub feedback: FeedbackSettings,

    #[serde(flatten)]
    pub kind: UnitKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    TestCase(TestCaseSpec),
    MutationSuite(MutationSuiteSpec),
}

impl GradableUnit {
    pub fn test_case(id: UnitId, name: impl Into<String>, spec: TestCaseSpec) -> Self {
        Self::with_kind(id, name, UnitKind::TestCase(spec))
    }

    pub fn mutation_suite(id: UnitId, name: impl Into<String>, spec: MutationSuiteSpec) -> Self {
        Self::with_kind(id, name, UnitKind::MutationSuite(spec))
    }

    fn with_kind(id: UnitId, name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            id,
            name: name.into(),
            deferred: false,
            sandbox_image: None,
            allow_network_access: false,
            instructor_files: Vec::new(),
            feedback: FeedbackSettings::default(),
            kind,
        }
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn with_instructor_files(
        mut self,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.instructor_files = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_feedback(mut self, feedback: FeedbackSettings) -> Self {
        self.feedback = feedback;
        self
    }

    /// Every command the unit may run.
    pub fn commands(&self) -> Vec<&Command> {
        match &self.kind {
            UnitKind::TestCase(spec) => spec.compile.iter().chain([&spec.run]).collect(),
            UnitKind::MutationSuite(spec) => spec
                .setup
                .iter()
                .chain([
                    &spec.get_student_test_names,
                    &spec.student_test_validity_check,
                    &spec.grade_buggy_impl,
                ])
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        self.commands().into_iter().try_for_each(Command::validate)
    }

    /// Project files the unit reads: the ones copied into its sandbox plus
    /// those named as stdin or expected output.
    pub fn referenced_files(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.instructor_files.iter().map(String::as_str).collect();
        if let UnitKind::TestCase(spec) = &self.kind {
            if let StdinSource::InstructorFile(name) = &spec.stdin {
                names.push(name);
            }
            for expected in [&spec.expected_stdout, &spec.expected_stderr] {
                if let ExpectedOutput::InstructorFile(name) = expected {
                    names.push(name);
                }
            }
        }
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Where a test's stdin comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdinSource {
    #[default]
    None,
    Text(String),
    InstructorFile(String),
    CompileStdout,
    CompileStderr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedReturnCode {
    /// Return code is not checked
    #[default]
    None,
    Zero,
    /// Any non-zero code is correct
    Nonzero,
    Exact(i32),
}

impl ExpectedReturnCode {
    pub fn is_checked(self) -> bool {
        self != ExpectedReturnCode::None
    }

    /// `None` when the return code is not checked.
    pub fn accepts(self, return_code: i32) -> Option<bool> {
        match self {
            ExpectedReturnCode::None => None,
            ExpectedReturnCode::Zero => Some(return_code == 0),
            ExpectedReturnCode::Nonzero => Some(return_code != 0),
            ExpectedReturnCode::Exact(code) => Some(return_code == code),
        }
    }
}

/// Expected contents of stdout or stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutput {
    #[default]
    None,
    Text(String),
    InstructorFile(String),
}

impl ExpectedOutput {
    pub fn is_checked(&self) -> bool {
        *self != ExpectedOutput::None
    }
}

/// Runs the test's command again under a memory checker such as valgrind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChecker {
    /// Prepended to the run command, e.g. `valgrind --error-exitcode=1`
    pub command_prefix: String,
    /// Points removed when the checker reports errors
    #[serde(default)]
    pub deduction: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPoints {
    #[serde(default)]
    pub return_code: u32,
    #[serde(default)]
    pub stdout: u32,
    #[serde(default)]
    pub stderr: u32,
    #[serde(default)]
    pub compilation: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseSpec {
    #[serde(default)]
    pub compile: Option<Command>,
    pub run: Command,
    #[serde(default)]
    pub stdin: StdinSource,
    #[serde(default)]
    pub expected_return_code: ExpectedReturnCode,
    #[serde(default)]
    pub expected_stdout: ExpectedOutput,
    #[serde(default)]
    pub expected_stderr: ExpectedOutput,
    #[serde(default)]
    pub memory_checker: Option<MemoryChecker>,
    #[serde(default)]
    pub points: TestPoints,
}

impl TestCaseSpec {
    pub fn new(run: Command) -> Self {
        Self {
            compile: None,
            run,
            stdin: StdinSource::None,
            expected_return_code: ExpectedReturnCode::None,
            expected_stdout: ExpectedOutput::None,
            expected_stderr: ExpectedOutput::None,
            memory_checker: None,
            points: TestPoints::default(),
        }
    }
}

/// How the test name discovery output is split into names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestNameSplit {
    /// One name per line, surrounding whitespace stripped
    Newline,
    /// Any run of whitespace separates names
    #[default]
    Whitespace,
}

impl TestNameSplit {
    pub fn split(self, output: &str) -> Vec<String> {
        match self {
            TestNameSplit::Newline => output
                .lines()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
            TestNameSplit::Whitespace => output.split_whitespace().map(String::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationSuiteSpec {
    #[serde(default)]
    pub setup: Option<Command>,
    pub get_student_test_names: Command,
    #[serde(default)]
    pub test_name_split: TestNameSplit,
    #[serde(default = "default_max_num_student_tests")]
    pub max_num_student_tests: usize,
    pub student_test_validity_check: Command,
    pub grade_buggy_impl: Command,
    pub buggy_impl_names: Vec<String>,
    #[serde(default)]
    pub points_per_exposed_bug: u32,
    /// Cap on the suite's total points
    #[serde(default)]
    pub max_points: Option<u32>,
}

impl MutationSuiteSpec {
    /// Whether bug exposure runs once per (bug, valid test) pair rather
    /// than once per bug over every valid test.
    pub fn grades_individual_tests(&self) -> bool {
        self.grade_buggy_impl
            .cmd
            .contains(STUDENT_TEST_NAME_PLACEHOLDER)
    }
}

fn default_max_num_student_tests() -> usize {
    25
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_return_code_accepts() {
        assert_eq!(ExpectedReturnCode::None.accepts(0), None);
        assert_eq!(ExpectedReturnCode::Zero.accepts(0), Some(true));
        assert_eq!(ExpectedReturnCode::Zero.accepts(3), Some(false));
        assert_eq!(ExpectedReturnCode::Nonzero.accepts(3), Some(true));
        assert_eq!(ExpectedReturnCode::Nonzero.accepts(-1), Some(true));
        assert_eq!(ExpectedReturnCode::Nonzero.accepts(0), Some(false));
        assert_eq!(ExpectedReturnCode::Exact(42).accepts(42), Some(true));
        assert_eq!(ExpectedReturnCode::Exact(42).accepts(0), Some(false));
    }

    #[test]
    fn newline_split_strips_lines() {
        let names = TestNameSplit::Newline.split("  test one \n\ntest_two\n");
        assert_eq!(names, vec!["test one", "test_two"]);
    }

    #[test]
    fn whitespace_split() {
        let names = TestNameSplit::Whitespace.split(" t1\tt2\n\nt3 ");
        assert_eq!(names, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn individual_test_grading_detected_from_placeholder() {
        let mut spec = MutationSuiteSpec {
            setup: None,
            get_student_test_names: Command::new("ls tests"),
            test_name_split: TestNameSplit::Whitespace,
            max_num_student_tests: 10,
            student_test_validity_check: Command::new("run ${student_test_name}"),
            grade_buggy_impl: Command::new("run ${buggy_impl_name} ${all_valid_test_names}"),
            buggy_impl_names: vec!["bug1".into()],
            points_per_exposed_bug: 1,
            max_points: None,
        };
        assert!(!spec.grades_individual_tests());

        spec.grade_buggy_impl = Command::new("run ${buggy_impl_name} ${student_test_name}");
        assert!(spec.grades_individual_tests());
    }

    #[test]
    fn referenced_files_include_stdin_and_expected_output() {
        let mut spec = TestCaseSpec::new(Command::new("./a.out"));
        spec.stdin = StdinSource::InstructorFile("in.txt".into());
        spec.expected_stdout = ExpectedOutput::InstructorFile("out.txt".into());
        spec.expected_stderr = ExpectedOutput::Text("".into());
        let unit =
            GradableUnit::test_case(1, "t", spec).with_instructor_files(["main.c", "in.txt"]);
        assert_eq!(unit.referenced_files(), vec!["in.txt", "main.c", "out.txt"]);
    }

    #[test]
    fn unit_validation_covers_every_command() {
        let mut spec = TestCaseSpec::new(Command::new("./a.out"));
        spec.compile = Some(Command::new(""));
        let unit = GradableUnit::test_case(1, "t", spec);
        assert_eq!(unit.validate(), Err(CommandError::EmptyCmd));
    }
}
