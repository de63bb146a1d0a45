//! Argument builder for the isolate CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateAction {
    Init,
    Run,
    Cleanup,
}

/// Builder for one isolate invocation. Run-only options are ignored for
/// `--init` and `--cleanup`.
#[derive(Debug)]
pub struct IsolateCommand {
    isolate_path: PathBuf,
    action: IsolateAction,
    box_id: u32,
    cgroup: bool,
    limits: ResourceLimits,
    mounts: Vec<MountConfig>,
    /// Sorted so the argument list is stable
    env: BTreeMap<String, String>,
    share_net: bool,
    meta_file: Option<PathBuf>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    working_dir: Option<String>,
    argv: Vec<String>,
}

impl IsolateCommand {
    pub fn new(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            action: IsolateAction::Run,
            box_id,
            cgroup: false,
            limits: ResourceLimits::unlimited(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            share_net: false,
            meta_file: None,
            stdin: None,
            stdout: None,
            stderr: None,
            working_dir: None,
            argv: Vec::new(),
        }
    }

    pub fn action(mut self, action: IsolateAction) -> Self {
        self.action = action;
        self
    }

    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Keep the host network namespace (`--share-net`)
    pub fn share_net(mut self, enable: bool) -> Self {
        self.share_net = enable;
        self
    }

    pub fn meta_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_file = Some(path.into());
        self
    }

    /// Redirect stdin, stdout and stderr to files at sandbox-internal paths.
    pub fn redirect(
        mut self,
        stdin: impl Into<PathBuf>,
        stdout: impl Into<PathBuf>,
        stderr: impl Into<PathBuf>,
    ) -> Self {
        self.stdin = Some(stdin.into());
        self.stdout = Some(stdout.into());
        self.stderr = Some(stderr.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn argv(mut self, argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    /// Build the full argument list, program first.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            self.isolate_path.to_string_lossy().into_owned(),
            format!("--box-id={}", self.box_id),
        ];
        if self.cgroup {
            args.push("--cg".to_string());
        }

        match self.action {
            IsolateAction::Init => args.push("--init".to_string()),
            IsolateAction::Cleanup => args.push("--cleanup".to_string()),
            IsolateAction::Run => {
                args.push("--run".to_string());
                push_limits(&mut args, &self.limits, self.cgroup);

                for mount in &self.mounts {
                    if mount.optional && !Path::new(&mount.source).exists() {
                        continue;
                    }
                    let rw = if mount.writable { ":rw" } else { "" };
                    let maybe = if mount.optional { ":maybe" } else { "" };
                    args.push(format!("--dir={}={}{rw}{maybe}", mount.target, mount.source));
                }

                if self.share_net {
                    args.push("--share-net".to_string());
                }
                args.extend(self.env.iter().map(|(k, v)| format!("--env={k}={v}")));

                let files = [
                    ("--meta", &self.meta_file),
                    ("--stdin", &self.stdin),
                    ("--stdout", &self.stdout),
                    ("--stderr", &self.stderr),
                ];
                for (flag, path) in files {
                    if let Some(path) = path {
                        args.push(format!("{flag}={}", path.display()));
                    }
                }
                if let Some(dir) = &self.working_dir {
                    args.push(format!("--chdir={dir}"));
                }

                args.push("--".to_string());
                args.extend(self.argv);
            }
        }

        args
    }
}

fn push_limits(args: &mut Vec<String>, limits: &ResourceLimits, cgroup: bool) {
    if let Some(time) = limits.time_limit {
        args.push(format!("--time={time}"));
    }
    if let Some(wall) = limits.wall_time_limit {
        args.push(format!("--wall-time={wall}"));
    }
    if let Some(extra) = limits.extra_time {
        args.push(format!("--extra-time={extra}"));
    }
    if let Some(memory) = limits.memory_limit {
        let flag = if cgroup { "--cg-mem" } else { "--mem" };
        args.push(format!("{flag}={memory}"));
    }
    if let Some(stack) = limits.stack_limit {
        args.push(format!("--stack={stack}"));
    }
    if let Some(procs) = limits.max_processes {
        args.push(format!("--processes={procs}"));
    }
    if let Some(fsize) = limits.max_file_size {
        args.push(format!("--fsize={fsize}"));
    }
    if let Some(files) = limits.max_open_files {
        args.push(format!("--open-files={files}"));
    }
}
