//! Sandboxes backed by isolate boxes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::isolate::{
    BOX_DIR, BoxPool, IsolateBox, IsolateCommand, IsolateError, run_batch, validate_mounts,
};
use crate::model::CompletedCommand;
use crate::sandbox::{CommandRequest, SandboxBackend, SandboxError, SandboxHandle, SandboxSpec};
use crate::types::{MountConfig, ResourceLimits, SandboxFile};

/// Creates sandboxes from the configured box pool. Images map to mount
/// sets and a PATH through [`Config::images`].
#[derive(Debug)]
pub struct IsolateBackend {
    config: Arc<Config>,
    pool: BoxPool,
}

impl IsolateBackend {
    /// Fails if a required mount of any image is missing on the host.
    pub fn new(config: Arc<Config>) -> Result<Self, IsolateError> {
        validate_mounts(
            config
                .sandbox_mounts
                .iter()
                .chain(config.images.values().flat_map(|image| &image.mounts)),
        )?;
        let pool = BoxPool::new(
            config.box_pool.start_id,
            config.box_pool.count,
            config.isolate_binary(),
            config.cgroup,
        );
        Ok(Self { config, pool })
    }

    pub fn pool(&self) -> &BoxPool {
        &self.pool
    }
}

#[async_trait]
impl SandboxBackend for IsolateBackend {
    type Handle = IsolateSandbox;

    #[instrument(skip(self, spec), fields(image = %spec.image))]
    async fn create(&self, spec: &SandboxSpec) -> Result<IsolateSandbox, SandboxError> {
        let image = self
            .config
            .get_image(&spec.image)
            .map_err(|_| SandboxError::UnknownImage(spec.image.clone()))?;

        let sandbox = self
            .pool
            .acquire()
            .await
            .map_err(|e| SandboxError::CreateFailed {
                image: spec.image.clone(),
                message: e.to_string(),
            })?;

        let mut env = BTreeMap::from([
            ("PATH".to_string(), image.path.clone()),
            ("HOME".to_string(), BOX_DIR.to_string()),
        ]);
        env.extend(image.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(spec.env.clone());

        debug!(box_id = sandbox.id(), "isolate sandbox ready");
        Ok(IsolateSandbox {
            sandbox,
            mounts: self
                .config
                .sandbox_mounts
                .iter()
                .chain(&image.mounts)
                .cloned()
                .collect(),
            env,
            share_net: spec.allow_network,
            base_limits: self.config.default_limits.clone(),
        })
    }
}

#[derive(Debug)]
pub struct IsolateSandbox {
    sandbox: IsolateBox,
    mounts: Vec<MountConfig>,
    env: BTreeMap<String, String>,
    share_net: bool,
    /// Applied under each command's own limits
    base_limits: ResourceLimits,
}

impl IsolateSandbox {
    fn backend_error(&self, err: IsolateError) -> SandboxError {
        SandboxError::Backend {
            sandbox_id: self.id(),
            message: err.to_string(),
        }
    }

    fn command(&self, request: &CommandRequest) -> IsolateCommand {
        let command = IsolateCommand::new(self.sandbox.isolate_path(), self.sandbox.id())
            .cgroup(self.sandbox.cgroup())
            .limits(self.base_limits.with_overrides(&request.limits))
            .mounts(self.mounts.iter().cloned())
            .share_net(self.share_net)
            .working_dir(BOX_DIR)
            .argv(request.argv.iter().cloned());
        self.env
            .iter()
            .fold(command, |command, (key, value)| command.env(key, value))
    }
}

#[async_trait]
impl SandboxHandle for IsolateSandbox {
    fn id(&self) -> String {
        format!("isolate-{}", self.sandbox.id())
    }

    async fn copy_files_in(&mut self, files: &[SandboxFile]) -> Result<(), SandboxError> {
        for file in files {
            self.sandbox
                .write_file(&file.name, &file.content)
                .await
                .map_err(|e| self.backend_error(e))?;
        }
        Ok(())
    }

    async fn run_command(
        &mut self,
        request: &CommandRequest,
    ) -> Result<CompletedCommand, SandboxError> {
        let output = run_batch(
            &self.sandbox,
            self.command(request),
            request.stdin.as_deref(),
            request.output_ceiling,
        )
        .await
        .map_err(|e| self.backend_error(e))?;

        Ok(CompletedCommand {
            return_code: output.meta.return_code(),
            timed_out: output.meta.timed_out(),
            stdout: output.stdout,
            stderr: output.stderr,
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
        })
    }

    async fn destroy(&mut self) -> Result<(), SandboxError> {
        self.sandbox
            .cleanup()
            .await
            .map_err(|e| SandboxError::Teardown {
                sandbox_id: self.id(),
                message: e.to_string(),
            })
    }
}
