//! Scripted fakes for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::alert::{AlertSink, SandboxAlert};
use crate::model::{
    Command, CompletedCommand, ExpectedReturnCode, GradableUnit, TestCaseSpec, UnitId,
};
use crate::sandbox::{CommandRequest, SandboxBackend, SandboxError, SandboxHandle, SandboxSpec};
use crate::types::SandboxFile;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a fake sandbox answers to a matching command.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    completed: CompletedCommand,
    backend_error: bool,
    delay: Duration,
}

impl Reply {
    pub(crate) fn ok() -> Self {
        Self {
            completed: CompletedCommand::default(),
            backend_error: false,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn exit(code: i32) -> Self {
        let mut reply = Self::ok();
        reply.completed.return_code = code;
        reply
    }

    /// Killed at its time limit.
    pub(crate) fn timeout() -> Self {
        Self::exit(137).timed_out()
    }

    pub(crate) fn backend_error() -> Self {
        Self {
            backend_error: true,
            ..Self::ok()
        }
    }

    pub(crate) fn timed_out(mut self) -> Self {
        self.completed.timed_out = true;
        self
    }

    /// Take `delay` to answer.
    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.completed.stdout = stdout.into();
        self
    }

    pub(crate) fn stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.completed.stderr = stderr.into();
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    /// First rule whose pattern occurs in the command line wins
    rules: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<CommandRequest>>,
    specs: Mutex<Vec<SandboxSpec>>,
    copied: Mutex<Vec<String>>,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    failing_creates: AtomicU32,
    failing_teardown: AtomicBool,
}

/// Sandbox backend that answers commands from a script. Clones share
/// state, so a test keeps one clone to inspect what the engine did.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<FakeState>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `reply`. Unmatched
    /// commands exit 0 with no output.
    pub(crate) fn on(self, pattern: impl Into<String>, reply: Reply) -> Self {
        lock(&self.state.rules).push((pattern.into(), reply));
        self
    }

    pub(crate) fn failing_teardown(self) -> Self {
        self.state.failing_teardown.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` creations.
    pub(crate) fn fail_creates(&self, n: u32) {
        self.state.failing_creates.store(n, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn specs(&self) -> Vec<SandboxSpec> {
        lock(&self.state.specs).clone()
    }

    pub(crate) fn requests(&self) -> Vec<CommandRequest> {
        lock(&self.state.requests).clone()
    }

    /// The shell command line of every request, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|request| request.argv.last().cloned())
            .collect()
    }

    /// Names of every file copied into any sandbox, in order.
    pub(crate) fn copied(&self) -> Vec<String> {
        lock(&self.state.copied).clone()
    }
}

#[async_trait]
impl SandboxBackend for FakeBackend {
    type Handle = FakeHandle;

    async fn create(&self, spec: &SandboxSpec) -> Result<FakeHandle, SandboxError> {
        let failing = self
            .state
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SandboxError::CreateFailed {
                image: spec.image.clone(),
                message: "scripted failure".to_string(),
            });
        }

        let n = self.state.created.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.state.specs).push(spec.clone());
        Ok(FakeHandle {
            id: format!("fake-{n}"),
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct FakeHandle {
    id: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl SandboxHandle for FakeHandle {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn copy_files_in(&mut self, files: &[SandboxFile]) -> Result<(), SandboxError> {
        lock(&self.state.copied).extend(files.iter().map(|file| file.name.clone()));
        Ok(())
    }

    async fn run_command(
        &mut self,
        request: &CommandRequest,
    ) -> Result<CompletedCommand, SandboxError> {
        lock(&self.state.requests).push(request.clone());

        let line = request.argv.last().cloned().unwrap_or_default();
        let reply = lock(&self.state.rules)
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(Reply::ok);

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        if reply.backend_error {
            return Err(SandboxError::Backend {
                sandbox_id: self.id.clone(),
                message: format!("scripted failure running '{line}'"),
            });
        }
        Ok(reply.completed)
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        if self.state.failing_teardown.load(Ordering::SeqCst) {
            return Err(SandboxError::Teardown {
                sandbox_id: self.id.clone(),
                message: "scripted failure".to_string(),
            });
        }
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingAlertSink {
    alerts: Mutex<Vec<SandboxAlert>>,
}

impl RecordingAlertSink {
    pub(crate) fn alerts(&self) -> Vec<SandboxAlert> {
        lock(&self.alerts).clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: SandboxAlert) {
        lock(&self.alerts).push(alert);
    }
}

/// A test case worth one point for exiting zero.
pub(crate) fn scored_unit(id: UnitId, deferred: bool) -> GradableUnit {
    let mut spec = TestCaseSpec::new(Command::new(format!("./test_{id}")));
    spec.expected_return_code = ExpectedReturnCode::Zero;
    spec.points.return_code = 1;
    GradableUnit::test_case(id, format!("test {id}"), spec).deferred(deferred)
}
