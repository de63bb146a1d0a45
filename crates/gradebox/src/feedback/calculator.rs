//! Student-visible projections of raw results.
//!
//! Nothing here touches a store or a sandbox: every value is derived from
//! the unit definition, its raw result and the resolved feedback config.

use serde::Serialize;
use uuid::Uuid;

use crate::feedback::config::{
    BugsExposedFeedback, CompilationFeedback, FeedbackCategory, FeedbackConfig,
    MemoryCheckerFeedback, NameFeedback, PointsFeedback, ResolvedFeedbackConfig, ValueFeedback,
};
use crate::feedback::diff::line_diff;
use crate::model::{
    CompletedCommand, ExpectedOutput, ExpectedReturnCode, GradableUnit, MutationSuiteResult,
    MutationSuiteSpec, TestCaseResult, TestCaseSpec, UnitId, UnitKind, UnitResult,
};
use crate::types::SandboxFile;

/// Feedback for any unit kind. Built with [`UnitFeedback::new`], which
/// yields `None` when the result does not belong to the unit's kind.
#[derive(Debug)]
pub enum UnitFeedback<'a> {
    TestCase(TestCaseFeedback<'a>),
    MutationSuite(MutationSuiteFeedback<'a>),
}

impl<'a> UnitFeedback<'a> {
    pub fn new(
        unit: &'a GradableUnit,
        result: &'a UnitResult,
        config: &'a FeedbackConfig,
        instructor_files: &'a [SandboxFile],
    ) -> Option<Self> {
        match (&unit.kind, result) {
            (UnitKind::TestCase(spec), UnitResult::TestCase(result)) => Some(
                UnitFeedback::TestCase(TestCaseFeedback {
                    unit,
                    spec,
                    result,
                    config,
                    instructor_files,
                }),
            ),
            (UnitKind::MutationSuite(spec), UnitResult::MutationSuite(result)) => Some(
                UnitFeedback::MutationSuite(MutationSuiteFeedback {
                    unit,
                    spec,
                    result,
                    config,
                }),
            ),
            _ => None,
        }
    }

    pub fn total_points(&self) -> u32 {
        match self {
            UnitFeedback::TestCase(fdbk) => fdbk.total_points(),
            UnitFeedback::MutationSuite(fdbk) => fdbk.total_points(),
        }
    }

    pub fn total_points_possible(&self) -> u32 {
        match self {
            UnitFeedback::TestCase(fdbk) => fdbk.total_points_possible(),
            UnitFeedback::MutationSuite(fdbk) => fdbk.total_points_possible(),
        }
    }

    pub fn view(&self) -> UnitFeedbackView {
        match self {
            UnitFeedback::TestCase(fdbk) => UnitFeedbackView::TestCase(fdbk.view()),
            UnitFeedback::MutationSuite(fdbk) => UnitFeedbackView::MutationSuite(fdbk.view()),
        }
    }
}

/// The first unit, in `units` order, that students see under normal
/// feedback and that lost points. Its `first_failure` config, when set,
/// replaces the normal one.
pub fn first_failed_unit(
    units: &[GradableUnit],
    results: &[UnitResult],
    instructor_files: &[SandboxFile],
) -> Option<UnitId> {
    let max = FeedbackConfig::max();
    units
        .iter()
        .filter(|unit| {
            ResolvedFeedbackConfig::resolve(FeedbackCategory::Normal, &unit.feedback, None)
                .is_some()
        })
        .find(|unit| {
            results
                .iter()
                .find(|result| result.unit_id() == unit.id)
                .and_then(|result| UnitFeedback::new(unit, result, &max, instructor_files))
                .is_some_and(|fdbk| fdbk.total_points() < fdbk.total_points_possible())
        })
        .map(|unit| unit.id)
}

fn display_name(unit: &GradableUnit, level: NameFeedback) -> String {
    match level {
        NameFeedback::Show => unit.name.clone(),
        NameFeedback::RandomlyObfuscate => format!("test{}", Uuid::new_v4().simple()),
        NameFeedback::DeterministicallyObfuscate => format!("test{}", unit.id),
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReturnCodeFeedback {
    pub correct: Option<bool>,
    pub expected: Option<ExpectedReturnCode>,
    pub actual: Option<i32>,
    pub timed_out: Option<bool>,
    pub points: Option<u32>,
    pub points_possible: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputFeedback {
    pub correct: Option<bool>,
    pub content: Option<String>,
    pub truncated: Option<bool>,
    /// Empty exactly when the output is correct
    pub diff: Option<Vec<String>>,
    pub points: Option<u32>,
    pub points_possible: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompilationFeedbackView {
    pub succeeded: Option<bool>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub points: Option<u32>,
    pub points_possible: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryCheckerFeedbackView {
    pub errors_reported: Option<bool>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub points_deducted: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCaseFeedbackView {
    pub name: String,
    pub return_code: ReturnCodeFeedback,
    pub stdout: OutputFeedback,
    pub stderr: OutputFeedback,
    pub compilation: CompilationFeedbackView,
    pub memory_checker: MemoryCheckerFeedbackView,
    pub total_points: Option<u32>,
    pub total_points_possible: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupFeedbackView {
    pub return_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationSuiteFeedbackView {
    pub name: String,
    pub setup: Option<SetupFeedbackView>,
    pub student_tests: Vec<String>,
    pub discarded_tests: Vec<String>,
    pub invalid_tests: Option<Vec<String>>,
    pub timed_out_tests: Option<Vec<String>>,
    pub validity_check_stdout: Option<String>,
    pub validity_check_stderr: Option<String>,
    pub num_bugs_exposed: Option<usize>,
    pub bugs_exposed: Option<Vec<String>>,
    pub grade_buggy_impls_stdout: Option<String>,
    pub grade_buggy_impls_stderr: Option<String>,
    pub total_points: Option<u32>,
    pub total_points_possible: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFeedbackView {
    TestCase(TestCaseFeedbackView),
    MutationSuite(MutationSuiteFeedbackView),
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
pub struct TestCaseFeedback<'a> {
    unit: &'a GradableUnit,
    spec: &'a TestCaseSpec,
    result: &'a TestCaseResult,
    config: &'a FeedbackConfig,
    instructor_files: &'a [SandboxFile],
}

impl TestCaseFeedback<'_> {
    pub fn name(&self) -> String {
        display_name(self.unit, self.config.name)
    }

    fn points_shown(&self) -> bool {
        self.config.points == PointsFeedback::ShowBreakdown
    }

    fn run(&self) -> Option<&CompletedCommand> {
        self.result.run.as_ref()
    }

    pub fn return_code_correct(&self) -> Option<bool> {
        if self.config.return_code == ValueFeedback::NoFeedback {
            return None;
        }
        self.run()
            .and_then(|run| self.spec.expected_return_code.accepts(run.return_code))
    }

    pub fn return_code(&self) -> ReturnCodeFeedback {
        let level = self.config.return_code;
        let expected = self.spec.expected_return_code;
        let checked = expected.is_checked() && level != ValueFeedback::NoFeedback;
        let show_values = level == ValueFeedback::ShowExpectedAndActualValues;
        let show_actual = show_values || self.config.show_actual_return_code;

        let correct = self.return_code_correct();
        let points = self.spec.points.return_code;
        ReturnCodeFeedback {
            correct,
            expected: (show_values && expected.is_checked()).then_some(expected),
            actual: self.run().filter(|_| show_actual).map(|run| run.return_code),
            timed_out: self
                .run()
                .filter(|_| show_actual || checked)
                .map(|run| run.timed_out),
            points: if self.points_shown() {
                correct.map(|c| if c { points } else { 0 })
            } else {
                None
            },
            points_possible: (self.points_shown() && checked).then_some(points),
        }
    }

    fn expected_text(&self, expected: &ExpectedOutput) -> Option<String> {
        match expected {
            ExpectedOutput::None => None,
            ExpectedOutput::Text(text) => Some(text.clone()),
            ExpectedOutput::InstructorFile(name) => Some(
                self.instructor_files
                    .iter()
                    .find(|file| &file.name == name)
                    .map(|file| text(&file.content))
                    .unwrap_or_default(),
            ),
        }
    }

    fn output(&self, stream: Stream) -> OutputFeedback {
        let (level, show_content, expected, points) = match stream {
            Stream::Stdout => (
                self.config.stdout,
                self.config.show_actual_stdout,
                &self.spec.expected_stdout,
                self.spec.points.stdout,
            ),
            Stream::Stderr => (
                self.config.stderr,
                self.config.show_actual_stderr,
                &self.spec.expected_stderr,
                self.spec.points.stderr,
            ),
        };
        let actual = self.run().map(|run| match stream {
            Stream::Stdout => (&run.stdout, run.stdout_truncated),
            Stream::Stderr => (&run.stderr, run.stderr_truncated),
        });

        let checked = expected.is_checked() && level != ValueFeedback::NoFeedback;
        let expected = self.expected_text(expected);
        let correct = match (&expected, actual) {
            (Some(expected), Some((bytes, _))) if checked => {
                Some(expected.as_bytes() == bytes.as_slice())
            }
            _ => None,
        };

        let diff = match (&expected, actual, correct) {
            (Some(expected), Some((bytes, _)), Some(correct))
                if level == ValueFeedback::ShowExpectedAndActualValues =>
            {
                Some(if correct {
                    Vec::new()
                } else {
                    line_diff(expected, &text(bytes))
                })
            }
            _ => None,
        };

        let (content, truncated) = match actual {
            Some((bytes, truncated)) if show_content => (Some(text(bytes)), Some(truncated)),
            _ => (None, None),
        };

        OutputFeedback {
            correct,
            content,
            truncated,
            diff,
            points: if self.points_shown() {
                correct.map(|c| if c { points } else { 0 })
            } else {
                None
            },
            points_possible: (self.points_shown() && checked).then_some(points),
        }
    }

    pub fn stdout(&self) -> OutputFeedback {
        self.output(Stream::Stdout)
    }

    pub fn stderr(&self) -> OutputFeedback {
        self.output(Stream::Stderr)
    }

    pub fn compilation(&self) -> CompilationFeedbackView {
        let level = self.config.compilation;
        let Some(compile) = self.result.compile.as_ref() else {
            return CompilationFeedbackView::default();
        };
        if level == CompilationFeedback::NoFeedback {
            return CompilationFeedbackView::default();
        }

        let succeeded = compile.succeeded();
        let show_output = level == CompilationFeedback::ShowCompilerOutput;
        let points = self.spec.points.compilation;
        CompilationFeedbackView {
            succeeded: Some(succeeded),
            stdout: show_output.then(|| compile.stdout_text()),
            stderr: show_output.then(|| compile.stderr_text()),
            points: self
                .points_shown()
                .then_some(if succeeded { points } else { 0 }),
            points_possible: self.points_shown().then_some(points),
        }
    }

    pub fn memory_checker(&self) -> MemoryCheckerFeedbackView {
        let level = self.config.memory_checker;
        let (Some(checker), Some(run)) = (
            self.spec.memory_checker.as_ref(),
            self.result.memory_checker.as_ref(),
        ) else {
            return MemoryCheckerFeedbackView::default();
        };
        if level == MemoryCheckerFeedback::NoFeedback {
            return MemoryCheckerFeedbackView::default();
        }

        let errors = !run.succeeded();
        let show_output = level == MemoryCheckerFeedback::ShowOutput;
        MemoryCheckerFeedbackView {
            errors_reported: Some(errors),
            stdout: show_output.then(|| run.stdout_text()),
            stderr: show_output.then(|| run.stderr_text()),
            points_deducted: self
                .points_shown()
                .then_some(if errors { checker.deduction } else { 0 }),
        }
    }

    pub fn total_points(&self) -> u32 {
        let earned: u32 = [
            self.return_code().points,
            self.stdout().points,
            self.stderr().points,
            self.compilation().points,
        ]
        .into_iter()
        .flatten()
        .sum();
        earned.saturating_sub(self.memory_checker().points_deducted.unwrap_or(0))
    }

    pub fn total_points_possible(&self) -> u32 {
        [
            self.return_code().points_possible,
            self.stdout().points_possible,
            self.stderr().points_possible,
            self.compilation().points_possible,
        ]
        .into_iter()
        .flatten()
        .sum()
    }

    pub fn view(&self) -> TestCaseFeedbackView {
        let points_shown = self.points_shown();
        TestCaseFeedbackView {
            name: self.name(),
            return_code: self.return_code(),
            stdout: self.stdout(),
            stderr: self.stderr(),
            compilation: self.compilation(),
            memory_checker: self.memory_checker(),
            total_points: points_shown.then(|| self.total_points()),
            total_points_possible: points_shown.then(|| self.total_points_possible()),
        }
    }
}

#[derive(Debug)]
pub struct MutationSuiteFeedback<'a> {
    unit: &'a GradableUnit,
    spec: &'a MutationSuiteSpec,
    result: &'a MutationSuiteResult,
    config: &'a FeedbackConfig,
}

impl MutationSuiteFeedback<'_> {
    pub fn name(&self) -> String {
        display_name(self.unit, self.config.name)
    }

    fn points_shown(&self) -> bool {
        self.config.points == PointsFeedback::ShowBreakdown
            && self.config.bugs_exposed != BugsExposedFeedback::NoFeedback
    }

    pub fn num_bugs_exposed(&self) -> Option<usize> {
        (self.config.bugs_exposed >= BugsExposedFeedback::NumBugsExposed)
            .then_some(self.result.bugs_exposed.len())
    }

    pub fn bugs_exposed(&self) -> Option<&[String]> {
        (self.config.bugs_exposed == BugsExposedFeedback::ExposedBugNames)
            .then_some(self.result.bugs_exposed.as_slice())
    }

    fn uncapped_possible(&self) -> u32 {
        let bugs = u32::try_from(self.spec.buggy_impl_names.len()).unwrap_or(u32::MAX);
        bugs.saturating_mul(self.spec.points_per_exposed_bug)
    }

    pub fn total_points(&self) -> u32 {
        if !self.points_shown() {
            return 0;
        }
        let bugs = u32::try_from(self.result.bugs_exposed.len()).unwrap_or(u32::MAX);
        let earned = bugs.saturating_mul(self.spec.points_per_exposed_bug);
        match self.spec.max_points {
            Some(max) => earned.min(max),
            None => earned,
        }
    }

    pub fn total_points_possible(&self) -> u32 {
        if !self.points_shown() {
            return 0;
        }
        match self.spec.max_points {
            Some(max) => self.uncapped_possible().min(max),
            None => self.uncapped_possible(),
        }
    }

    pub fn view(&self) -> MutationSuiteFeedbackView {
        let config = self.config;
        let result = self.result;
        let points_shown = self.points_shown();
        MutationSuiteFeedbackView {
            name: self.name(),
            setup: result
                .setup
                .as_ref()
                .filter(|_| config.show_setup_output)
                .map(|setup| SetupFeedbackView {
                    return_code: setup.return_code,
                    timed_out: setup.timed_out,
                    stdout: setup.stdout_text(),
                    stderr: setup.stderr_text(),
                }),
            student_tests: result.student_tests.clone(),
            discarded_tests: result.discarded_tests.clone(),
            invalid_tests: config
                .show_invalid_test_names
                .then(|| result.invalid_tests.clone()),
            timed_out_tests: config
                .show_invalid_test_names
                .then(|| result.timed_out_tests.clone()),
            validity_check_stdout: config
                .show_validity_check_output
                .then(|| text(&result.validity_check_log.stdout)),
            validity_check_stderr: config
                .show_validity_check_output
                .then(|| text(&result.validity_check_log.stderr)),
            num_bugs_exposed: self.num_bugs_exposed(),
            bugs_exposed: self.bugs_exposed().map(<[String]>::to_vec),
            grade_buggy_impls_stdout: config
                .show_grade_buggy_impls_output
                .then(|| text(&result.grade_buggy_impls_log.stdout)),
            grade_buggy_impls_stderr: config
                .show_grade_buggy_impls_output
                .then(|| text(&result.grade_buggy_impls_log.stderr)),
            total_points: points_shown.then(|| self.total_points()),
            total_points_possible: points_shown.then(|| self.total_points_possible()),
        }
    }
}
