//! Feedback levels, per-category configs and viewer-based category
//! selection.

use serde::{Deserialize, Serialize};

use crate::model::{GradableUnit, UnitId};

/// How a unit's name is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameFeedback {
    #[default]
    Show,
    /// A fresh random token on every request
    RandomlyObfuscate,
    /// A stable token derived from the unit id
    DeterministicallyObfuscate,
}

/// Feedback level for return code, stdout and stderr checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFeedback {
    #[default]
    NoFeedback,
    CorrectOrIncorrectOnly,
    ShowExpectedAndActualValues,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationFeedback {
    #[default]
    NoFeedback,
    SuccessOrFailureOnly,
    ShowCompilerOutput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCheckerFeedback {
    #[default]
    NoFeedback,
    ErrorsOrNoErrorsOnly,
    ShowOutput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsFeedback {
    #[default]
    Hide,
    ShowBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugsExposedFeedback {
    #[default]
    NoFeedback,
    NumBugsExposed,
    ExposedBugNames,
}

/// What one viewer category may see of a unit's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Whether the unit appears at all
    pub visible: bool,
    pub name: NameFeedback,

    pub return_code: ValueFeedback,
    pub stdout: ValueFeedback,
    pub stderr: ValueFeedback,
    pub show_actual_return_code: bool,
    pub show_actual_stdout: bool,
    pub show_actual_stderr: bool,

    pub compilation: CompilationFeedback,
    pub memory_checker: MemoryCheckerFeedback,
    pub points: PointsFeedback,

    pub show_setup_output: bool,
    pub show_invalid_test_names: bool,
    pub show_validity_check_output: bool,
    pub bugs_exposed: BugsExposedFeedback,
    pub show_grade_buggy_impls_output: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            visible: true,
            name: NameFeedback::Show,
            return_code: ValueFeedback::CorrectOrIncorrectOnly,
            stdout: ValueFeedback::CorrectOrIncorrectOnly,
            stderr: ValueFeedback::CorrectOrIncorrectOnly,
            show_actual_return_code: false,
            show_actual_stdout: false,
            show_actual_stderr: false,
            compilation: CompilationFeedback::SuccessOrFailureOnly,
            memory_checker: MemoryCheckerFeedback::ErrorsOrNoErrorsOnly,
            points: PointsFeedback::ShowBreakdown,
            show_setup_output: false,
            show_invalid_test_names: true,
            show_validity_check_output: false,
            bugs_exposed: BugsExposedFeedback::NumBugsExposed,
            show_grade_buggy_impls_output: false,
        }
    }
}

impl FeedbackConfig {
    /// Everything visible.
    pub fn max() -> Self {
        Self {
            visible: true,
            name: NameFeedback::Show,
            return_code: ValueFeedback::ShowExpectedAndActualValues,
            stdout: ValueFeedback::ShowExpectedAndActualValues,
            stderr: ValueFeedback::ShowExpectedAndActualValues,
            show_actual_return_code: true,
            show_actual_stdout: true,
            show_actual_stderr: true,
            compilation: CompilationFeedback::ShowCompilerOutput,
            memory_checker: MemoryCheckerFeedback::ShowOutput,
            points: PointsFeedback::ShowBreakdown,
            show_setup_output: true,
            show_invalid_test_names: true,
            show_validity_check_output: true,
            bugs_exposed: BugsExposedFeedback::ExposedBugNames,
            show_grade_buggy_impls_output: true,
        }
    }

    /// Visible, with no result detail.
    pub fn none() -> Self {
        Self {
            visible: true,
            name: NameFeedback::Show,
            return_code: ValueFeedback::NoFeedback,
            stdout: ValueFeedback::NoFeedback,
            stderr: ValueFeedback::NoFeedback,
            show_actual_return_code: false,
            show_actual_stdout: false,
            show_actual_stderr: false,
            compilation: CompilationFeedback::NoFeedback,
            memory_checker: MemoryCheckerFeedback::NoFeedback,
            points: PointsFeedback::Hide,
            show_setup_output: false,
            show_invalid_test_names: false,
            show_validity_check_output: false,
            bugs_exposed: BugsExposedFeedback::NoFeedback,
            show_grade_buggy_impls_output: false,
        }
    }
}

/// Per-category feedback of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    pub normal: FeedbackConfig,
    pub ultimate_submission: FeedbackConfig,
    pub past_limit_submission: FeedbackConfig,
    pub staff_viewer: FeedbackConfig,
    /// Replaces `normal` for the first failed test shown to a student
    pub first_failure: Option<FeedbackConfig>,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            normal: FeedbackConfig::default(),
            ultimate_submission: FeedbackConfig::default(),
            past_limit_submission: FeedbackConfig::none(),
            staff_viewer: FeedbackConfig::max(),
            first_failure: None,
        }
    }
}

impl FeedbackSettings {
    fn for_category(&self, category: FeedbackCategory) -> FeedbackConfig {
        match category {
            FeedbackCategory::Normal => self.normal.clone(),
            FeedbackCategory::UltimateSubmission => self.ultimate_submission.clone(),
            FeedbackCategory::PastLimitSubmission => self.past_limit_submission.clone(),
            FeedbackCategory::StaffViewer => self.staff_viewer.clone(),
            FeedbackCategory::Max => FeedbackConfig::max(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    Normal,
    UltimateSubmission,
    PastLimitSubmission,
    StaffViewer,
    Max,
}

/// Who is looking at a submission, and in what circumstances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerContext {
    pub is_staff: bool,
    /// Staff asked to see what the group sees
    pub student_view: bool,
    pub is_group_member: bool,
    pub deadline_passed: bool,
    pub hide_ultimate_submission_feedback: bool,
    pub is_ultimate_submission: bool,
    pub past_daily_limit: bool,
}

impl FeedbackCategory {
    pub fn for_viewer(viewer: ViewerContext) -> Self {
        if viewer.is_staff && !(viewer.student_view && viewer.is_group_member) {
            return FeedbackCategory::StaffViewer;
        }
        if viewer.deadline_passed
            && !viewer.hide_ultimate_submission_feedback
            && viewer.is_ultimate_submission
        {
            return FeedbackCategory::UltimateSubmission;
        }
        if viewer.past_daily_limit {
            return FeedbackCategory::PastLimitSubmission;
        }
        FeedbackCategory::Normal
    }
}

/// The config in effect for one request, computed once and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFeedbackConfig {
    pub category: FeedbackCategory,
    pub config: FeedbackConfig,
}

impl ResolvedFeedbackConfig {
    /// `None` when the unit is hidden in `category`. An override replaces
    /// the category's config but never makes a hidden unit visible.
    pub fn resolve(
        category: FeedbackCategory,
        settings: &FeedbackSettings,
        override_config: Option<&FeedbackConfig>,
    ) -> Option<Self> {
        let base = settings.for_category(category);
        if !base.visible {
            return None;
        }
        let config = match override_config {
            Some(config) => config.clone(),
            None => base,
        };
        Some(Self { category, config })
    }

    /// Resolve `unit` for display, applying its `first_failure` config when
    /// it is the submission's first failed unit under normal feedback.
    pub fn for_unit(
        category: FeedbackCategory,
        unit: &GradableUnit,
        first_failed: Option<UnitId>,
    ) -> Option<Self> {
        let override_config = match category {
            FeedbackCategory::Normal if first_failed == Some(unit.id) => {
                unit.feedback.first_failure.as_ref()
            }
            _ => None,
        };
        Self::resolve(category, &unit.feedback, override_config)
    }

    /// Config used for the score recorded on the submission.
    pub fn scoring() -> Self {
        Self {
            category: FeedbackCategory::Max,
            config: FeedbackConfig::max(),
        }
    }
}
