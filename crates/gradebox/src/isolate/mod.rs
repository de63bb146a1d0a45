//! Thin async wrapper over the IOI isolate CLI.
//!
//! See <https://www.ucw.cz/isolate/isolate.1.html> for the flags and
//! meta file keys used here.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::isolate::box_manager::{BOX_DIR, BoxPool, IsolateBox};
pub use crate::isolate::command::{IsolateAction, IsolateCommand};
pub use crate::isolate::meta::{MetaFile, MetaParseError};
pub use crate::isolate::process::{BatchOutput, run_batch};
use crate::types::MountConfig;

mod box_manager;
mod command;
mod meta;
mod process;

#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("failed to initialize box {id}: {message}")]
    InitFailed { id: u32, message: String },

    #[error("failed to clean up box {id}: {message}")]
    CleanupFailed { id: u32, message: String },

    #[error("isolate command failed: {0}")]
    CommandFailed(String),

    #[error("failed to spawn isolate: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to parse meta file: {0}")]
    MetaParseFailed(String),

    #[error("box pool closed")]
    PoolExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path escapes the box: {0}")]
    InvalidPath(String),

    #[error("mount source does not exist: {0}")]
    MountSourceNotFound(PathBuf),
}

/// Set up the cgroup v2 tree isolate expects at `cg_root`, doing the job
/// of `isolate-cg-keeper` where that service is absent (containers).
///
/// `Ok(false)` means cgroup v2 or its memory controller is unavailable and
/// the caller should run without `--cg`.
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, IsolateError> {
    let cg_base = Path::new("/sys/fs/cgroup");
    let has_memory = |path: &Path| {
        fs::read_to_string(path)
            .map(|content| content.split_whitespace().any(|c| c == "memory"))
            .unwrap_or(false)
    };

    if !has_memory(&cg_base.join("cgroup.controllers")) {
        return Ok(false);
    }
    if has_memory(&cg_root.join("cgroup.subtree_control")) {
        return Ok(true);
    }

    // controllers cannot be enabled on a cgroup that holds processes, so
    // move this process into a leaf first
    let leaf = cg_base.join("init");
    fs::create_dir_all(&leaf)?;
    fs::write(leaf.join("cgroup.procs"), std::process::id().to_string())?;
    fs::write(cg_base.join("cgroup.subtree_control"), "+memory +pids")?;

    fs::create_dir_all(cg_root)?;
    fs::write(cg_root.join("cgroup.subtree_control"), "+memory +pids")?;
    Ok(true)
}

/// Check that every required mount source exists on the host.
pub fn validate_mounts<'a>(
    mounts: impl IntoIterator<Item = &'a MountConfig>,
) -> Result<(), IsolateError> {
    match mounts
        .into_iter()
        .find(|mount| !mount.optional && !Path::new(&mount.source).exists())
    {
        Some(mount) => Err(IsolateError::MountSourceNotFound(PathBuf::from(&mount.source))),
        None => Ok(()),
    }
}
