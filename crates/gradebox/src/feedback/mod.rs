//! Feedback: what a viewer may see of a unit's raw result.

pub use calculator::{
    CompilationFeedbackView, MemoryCheckerFeedbackView, MutationSuiteFeedback,
    MutationSuiteFeedbackView, OutputFeedback, ReturnCodeFeedback, SetupFeedbackView,
    TestCaseFeedback, TestCaseFeedbackView, UnitFeedback, UnitFeedbackView, first_failed_unit,
};
pub use config::{
    BugsExposedFeedback, CompilationFeedback, FeedbackCategory, FeedbackConfig,
    FeedbackSettings, MemoryCheckerFeedback, NameFeedback, PointsFeedback,
    ResolvedFeedbackConfig, ValueFeedback, ViewerContext,
};
pub use diff::line_diff;

mod calculator;
mod config;
mod diff;
