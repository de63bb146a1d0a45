//! Isolate box lifecycle and the pool of box ids.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::isolate::IsolateError;
use crate::isolate::command::{IsolateAction, IsolateCommand};

/// Sandbox-internal directory that commands start in.
pub const BOX_DIR: &str = "/box";

/// An initialized isolate box.
///
/// Call [`cleanup`](Self::cleanup) before dropping. Dropping an
/// initialized box logs a warning and cleans up from a detached thread;
/// its id returns to the pool only after that thread finishes.
#[derive(Debug)]
pub struct IsolateBox {
    id: u32,
    /// Root of the box on the host; the sandbox sees `<root>/box` as `/box`
    root: PathBuf,
    isolate_path: PathBuf,
    cgroup: bool,
    initialized: bool,
    lease: Option<BoxLease>,
}

impl IsolateBox {
    #[instrument(skip(isolate_path))]
    pub async fn init(
        id: u32,
        isolate_path: impl Into<PathBuf>,
        cgroup: bool,
    ) -> Result<Self, IsolateError> {
        let isolate_path = isolate_path.into();
        let output = run_isolate(
            IsolateCommand::new(&isolate_path, id)
                .action(IsolateAction::Init)
                .cgroup(cgroup),
        )
        .await?;

        if !output.status.success() {
            return Err(IsolateError::InitFailed {
                id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        if !root.join("box").is_dir() {
            return Err(IsolateError::InitFailed {
                id,
                message: format!("box directory missing under {}", root.display()),
            });
        }
        debug!(?root, "box initialized");

        Ok(Self {
            id,
            root,
            isolate_path,
            cgroup,
            initialized: true,
            lease: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    pub fn cgroup(&self) -> bool {
        self.cgroup
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Host path for private bookkeeping files. Not visible inside the box.
    pub fn private_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Host path of a file inside the box. `name` must be relative and
    /// stay inside the box.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, IsolateError> {
        let relative = Path::new(name);
        let contained = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(IsolateError::InvalidPath(name.to_string()));
        }
        Ok(self.root.join("box").join(relative))
    }

    /// Sandbox-internal path matching [`file_path`](Self::file_path).
    pub fn sandbox_path(&self, name: &str) -> Result<PathBuf, IsolateError> {
        self.file_path(name)?;
        Ok(Path::new(BOX_DIR).join(name))
    }

    #[instrument(skip(self, content), fields(box_id = self.id))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), IsolateError> {
        let path = self.file_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to box");
        Ok(())
    }

    #[must_use = "cleanup errors should be handled"]
    #[instrument(skip(self), fields(box_id = self.id))]
    pub async fn cleanup(&mut self) -> Result<(), IsolateError> {
        if !self.initialized {
            return Ok(());
        }
        let output = run_isolate(
            IsolateCommand::new(&self.isolate_path, self.id)
                .action(IsolateAction::Cleanup)
                .cgroup(self.cgroup),
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(stderr = %stderr, "cleanup failed");
            return Err(IsolateError::CleanupFailed {
                id: self.id,
                message: stderr,
            });
        }

        self.initialized = false;
        self.lease = None;
        debug!("box cleaned up");
        Ok(())
    }

    fn with_lease(mut self, lease: BoxLease) -> Self {
        self.lease = Some(lease);
        self
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if !self.initialized {
            return;
        }
        warn!(box_id = self.id, "box dropped without cleanup, cleaning up in background");

        let args = IsolateCommand::new(&self.isolate_path, self.id)
            .action(IsolateAction::Cleanup)
            .cgroup(self.cgroup)
            .build();
        let id = self.id;
        let lease = self.lease.take();
        std::thread::spawn(move || {
            let Some((program, rest)) = args.split_first() else {
                return;
            };
            match std::process::Command::new(program).args(rest).output() {
                Ok(output) if output.status.success() => {
                    debug!(box_id = id, "background cleanup succeeded");
                }
                Ok(output) => warn!(
                    box_id = id,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "background cleanup failed"
                ),
                Err(e) => warn!(box_id = id, error = %e, "background cleanup spawn failed"),
            }
            drop(lease);
        });
    }
}

async fn run_isolate(command: IsolateCommand) -> Result<std::process::Output, IsolateError> {
    let args = command.build();
    debug!(?args, "running isolate");
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| IsolateError::CommandFailed("empty command arguments".to_string()))?;
    Command::new(program)
        .args(rest)
        .output()
        .await
        .map_err(IsolateError::SpawnFailed)
}

/// A box id checked out of a [`BoxPool`]. Returns the id on drop.
#[derive(Debug)]
struct BoxLease {
    id: u32,
    free: Arc<Mutex<Vec<u32>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for BoxLease {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);
    }
}

/// Fixed range of box ids. An id is never handed to two live boxes.
#[derive(Debug)]
pub struct BoxPool {
    isolate_path: PathBuf,
    cgroup: bool,
    count: u32,
    free: Arc<Mutex<Vec<u32>>>,
    semaphore: Arc<Semaphore>,
}

impl BoxPool {
    pub fn new(start_id: u32, count: u32, isolate_path: impl Into<PathBuf>, cgroup: bool) -> Self {
        // popped from the back, so the lowest id goes out first
        let free = (start_id..start_id.saturating_add(count)).rev().collect();
        Self {
            isolate_path: isolate_path.into(),
            cgroup,
            count,
            free: Arc::new(Mutex::new(free)),
            semaphore: Arc::new(Semaphore::new(count as usize)),
        }
    }

    /// Wait for a free id and initialize a box with it.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<IsolateBox, IsolateError> {
        let lease = self.lease().await?;
        debug!(id = lease.id, "acquired box id");
        let sandbox = IsolateBox::init(lease.id, &self.isolate_path, self.cgroup).await?;
        Ok(sandbox.with_lease(lease))
    }

    async fn lease(&self) -> Result<BoxLease, IsolateError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IsolateError::PoolExhausted)?;
        let id = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(IsolateError::PoolExhausted)?;
        Ok(BoxLease {
            id,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> u32 {
        self.count
    }
}
