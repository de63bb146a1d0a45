//! Configuration file loading for gradebox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError};

/// Prefix of environment variables that override file settings, e.g.
/// `GRADEBOX_GRADING__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "GRADEBOX";

impl Config {
    /// Load configuration from a file, with `GRADEBOX_*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.box_pool.count == 0 {
            return Err(ConfigError::Invalid(
                "box_pool.count must be at least 1".to_string(),
            ));
        }
        if self.box_pool.start_id.checked_add(self.box_pool.count).is_none() {
            return Err(ConfigError::Invalid(
                "box_pool range overflows".to_string(),
            ));
        }

        self.get_image(&self.default_image)?;
        for (tag, image) in &self.images {
            if image.path.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "image '{tag}' has empty path"
                )));
            }
        }

        let grading = &self.grading;
        if grading.output_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "grading.output_ceiling must be positive".to_string(),
            ));
        }
        if grading.combined_log_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "grading.combined_log_ceiling must be positive".to_string(),
            ));
        }
        if grading.workers == 0 {
            return Err(ConfigError::Invalid(
                "grading.workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
