use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MountConfig, ResourceLimits};

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../gradebox.example.toml");

/// Image tag used when a config file names no default image.
pub const DEFAULT_IMAGE: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("sandbox image '{0}' not found in configuration")]
    ImageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the Isolate binary (uses PATH if not specified).
    #[serde(default)]
    pub isolate_path: Option<PathBuf>,

    /// Use cgroup memory limiting instead of RLIMIT_AS.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root path for isolate. Must match isolate's `cg_root` config value.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// Range of isolate box ids handed out to sandboxes.
    #[serde(default)]
    pub box_pool: BoxPoolConfig,

    /// Directory mounts applied to every sandbox.
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Limits applied under every command's own limits.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Image used by units that do not name one.
    #[serde(default = "default_image")]
    pub default_image: String,

    /// Sandbox images keyed by tag.
    #[serde(default = "default_images")]
    pub images: HashMap<String, ImageConfig>,

    #[serde(default)]
    pub grading: GradingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxPoolConfig {
    #[serde(default)]
    pub start_id: u32,
    #[serde(default = "default_box_count")]
    pub count: u32,
}

impl Default for BoxPoolConfig {
    fn default() -> Self {
        Self {
            start_id: 0,
            count: default_box_count(),
        }
    }
}

/// A sandbox image: the host directories that make up its filesystem and
/// the environment commands see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// PATH inside the sandbox
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Bytes kept per output stream of a single command
    #[serde(default = "default_output_ceiling")]
    pub output_ceiling: usize,

    /// Bytes kept per stream of a mutation suite's combined logs
    #[serde(default = "default_output_ceiling")]
    pub combined_log_ceiling: usize,

    /// Concurrent grading workers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            output_ceiling: default_output_ceiling(),
            combined_log_ceiling: default_output_ceiling(),
            workers: default_workers(),
        }
    }
}

impl Config {
    /// Get a sandbox image by tag
    pub fn get_image(&self, tag: &str) -> Result<&ImageConfig, ConfigError> {
        self.images
            .get(tag)
            .ok_or_else(|| ConfigError::ImageNotFound(tag.to_string()))
    }

    /// Get the path to the isolate binary
    pub fn isolate_binary(&self) -> PathBuf {
        self.isolate_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("isolate"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isolate_path: None,
            cgroup: false,
            cg_root: default_cg_root(),
            box_pool: BoxPoolConfig::default(),
            sandbox_mounts: Vec::new(),
            default_limits: ResourceLimits::default(),
            default_image: default_image(),
            images: default_images(),
            grading: GradingConfig::default(),
        }
    }
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/isolate")
}

fn default_box_count() -> u32 {
    16
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_images() -> HashMap<String, ImageConfig> {
    HashMap::from([(
        DEFAULT_IMAGE.to_string(),
        ImageConfig {
            path: default_sandbox_path(),
            ..Default::default()
        },
    )])
}

fn default_sandbox_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_output_ceiling() -> usize {
    8 * 1024 * 1024
}

fn default_workers() -> usize {
    4
}
