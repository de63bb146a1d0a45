//! Sandbox contract and lifecycle.
//!
//! A [`SandboxBackend`] creates isolated environments; each one is owned
//! by exactly one grading job through its [`SandboxHandle`]. The
//! [`SandboxManager`] wraps a backend, and is the only place sandboxes are
//! created or torn down. Teardown never fails the job: a failed teardown
//! goes to the [`AlertSink`] instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::alert::{AlertSink, SandboxAlert};
use crate::model::CompletedCommand;
use crate::types::{ResourceLimits, SandboxFile};

pub use crate::sandbox::isolate::{IsolateBackend, IsolateSandbox};

mod isolate;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox from image '{image}': {message}")]
    CreateFailed { image: String, message: String },

    #[error("unknown sandbox image '{0}'")]
    UnknownImage(String),

    #[error("sandbox {sandbox_id}: {message}")]
    Backend { sandbox_id: String, message: String },

    #[error("failed to tear down sandbox {sandbox_id}: {message}")]
    Teardown { sandbox_id: String, message: String },
}

impl SandboxError {
    /// Creation failures may succeed on retry; a failing backend under a
    /// live sandbox produced no trustworthy result and will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, SandboxError::CreateFailed { .. })
    }
}

/// What a sandbox is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub allow_network: bool,
}

impl SandboxSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
            allow_network: false,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }
}

/// One command as the backend sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub argv: Vec<String>,
    pub limits: ResourceLimits,
    pub stdin: Option<Vec<u8>>,
    /// Bytes kept per output stream
    pub output_ceiling: usize,
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    type Handle: SandboxHandle;

    async fn create(&self, spec: &SandboxSpec) -> Result<Self::Handle, SandboxError>;
}

#[async_trait]
pub trait SandboxHandle: Send {
    fn id(&self) -> String;

    async fn copy_files_in(&mut self, files: &[SandboxFile]) -> Result<(), SandboxError>;

    /// A nonzero exit or timeout is an `Ok` result. `Err` means the
    /// backend failed and the command's outcome is unknown.
    async fn run_command(
        &mut self,
        request: &CommandRequest,
    ) -> Result<CompletedCommand, SandboxError>;

    async fn destroy(&mut self) -> Result<(), SandboxError>;
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SandboxPhase {
    Create,
    Destroy,
}

#[cfg(test)]
pub(crate) type SandboxFaultHook =
    Arc<dyn Fn(SandboxPhase) -> Option<SandboxError> + Send + Sync>;

pub struct SandboxManager<B> {
    backend: B,
    alerts: Arc<dyn AlertSink>,
    #[cfg(test)]
    fault_hook: Option<SandboxFaultHook>,
}

impl<B: SandboxBackend> SandboxManager<B> {
    pub fn new(backend: B, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            backend,
            alerts,
            #[cfg(test)]
            fault_hook: None,
        }
    }

    /// Inject failures at lifecycle phases.
    #[cfg(test)]
    pub(crate) fn with_fault_hook(mut self, hook: SandboxFaultHook) -> Self {
        self.fault_hook = Some(hook);
        self
    }

    #[cfg(test)]
    fn fault(&self, phase: SandboxPhase) -> Option<SandboxError> {
        self.fault_hook.as_ref().and_then(|hook| hook(phase))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[instrument(skip(self, spec), fields(image = %spec.image, network = spec.allow_network))]
    pub async fn create(&self, spec: &SandboxSpec) -> Result<B::Handle, SandboxError> {
        #[cfg(test)]
        if let Some(err) = self.fault(SandboxPhase::Create) {
            return Err(err);
        }
        let handle = self.backend.create(spec).await?;
        debug!(sandbox_id = %handle.id(), "sandbox created");
        Ok(handle)
    }

    /// Tear a sandbox down. Failures are reported to the alert sink and
    /// never to the caller.
    #[instrument(skip_all, fields(sandbox_id = %handle.id()))]
    pub async fn dispose(&self, mut handle: B::Handle) {
        let sandbox_id = handle.id();
        match self.destroy(&mut handle).await {
            Ok(()) => debug!("sandbox destroyed"),
            Err(err) => self
                .alerts
                .alert(SandboxAlert::teardown_failed(sandbox_id, err)),
        }
    }

    async fn destroy(&self, handle: &mut B::Handle) -> Result<(), SandboxError> {
        #[cfg(test)]
        if let Some(err) = self.fault(SandboxPhase::Destroy) {
            return Err(err);
        }
        handle.destroy().await
    }
}
