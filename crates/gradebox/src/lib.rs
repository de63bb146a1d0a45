//! A grading engine for student code submissions.
//!
//! Gradebox runs instructor-defined commands against student submissions
//! inside isolated sandboxes, records the raw results, and derives what each
//! viewer may see of them through a per-unit feedback policy.
//!
//! # Features
//!
//! - **Sandboxed grading**: Each gradable unit runs in its own sandbox, backed by IOI Isolate.
//! - **Test cases**: Compile, run with configurable stdin, check return code and output,
//!   memory-check.
//! - **Mutation testing**: Score student test suites by the buggy implementations they expose.
//! - **Race-safe lifecycle**: Cancellation always wins over a worker's late status write.
//! - **Deferred units**: Slow units are graded after the submission's other units.
//! - **Feedback policy**: Per-category visibility of every result facet, computed on read.

pub use alert::{AlertSink, LogAlertSink, SandboxAlert, Severity};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use dispatch::{Dispatcher, GradeOutcome, GradingJob, JobReceiver};
pub use error::{AbortReason, GradingError};
pub use isolate::{BoxPool, IsolateBox, IsolateError, prepare_cgroup};
pub use pipeline::Pipeline;
pub use retry::RetryPolicy;
pub use runner::CommandRunner;
pub use sandbox::{
    IsolateBackend, SandboxBackend, SandboxError, SandboxHandle, SandboxManager, SandboxSpec,
};
pub use status::{StatusError, StatusMachine, TransitionOutcome};
pub use store::{MemoryStore, Repositories, StoreError};
pub use types::{MountConfig, ResourceLimits, SandboxFile};

pub mod alert;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod isolate;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod sandbox;
pub mod status;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;
