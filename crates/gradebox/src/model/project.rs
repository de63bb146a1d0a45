//! Project definitions: the instructor files and gradable units of one
//! assignment, loaded from TOML.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::model::unit::{GradableUnit, UnitKind};
use crate::types::SandboxFile;

/// An instructor file on disk, relative to the project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub files: Vec<ProjectFile>,
    #[serde(default)]
    pub units: Vec<GradableUnit>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Project {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let mut project: Project = config.try_deserialize()?;
        project.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        project.validate()?;
        Ok(project)
    }

    /// Parse a project from TOML. File paths resolve against the current
    /// directory.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let project: Project = config.try_deserialize()?;
        project.validate()?;
        Ok(project)
    }

    /// Read every instructor file from disk.
    pub fn load_files(&self) -> Result<Vec<SandboxFile>, ConfigError> {
        self.files
            .iter()
            .map(|file| {
                let path = self.base_dir.join(&file.path);
                std::fs::read(&path)
                    .map(|content| SandboxFile::new(file.name.clone(), content))
                    .map_err(|source| ConfigError::ReadFile { path, source })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Invalid("project has empty id".to_string()));
        }

        let file_names: HashSet<&str> = self.files.iter().map(|f| f.name.as_str()).collect();
        let mut unit_ids = HashSet::new();

        for unit in &self.units {
            let invalid = |message: String| {
                ConfigError::Invalid(format!("unit '{}' ({}): {message}", unit.name, unit.id))
            };

            if !unit_ids.insert(unit.id) {
                return Err(invalid("duplicate unit id".to_string()));
            }
            unit.validate().map_err(|e| invalid(e.to_string()))?;

            if let UnitKind::MutationSuite(spec) = &unit.kind {
                if spec.buggy_impl_names.is_empty() {
                    return Err(invalid("no buggy implementations".to_string()));
                }
            }

            let referenced = unit.referenced_files();
            if let Some(missing) = referenced.iter().find(|name| !file_names.contains(*name)) {
                return Err(invalid(format!("unknown instructor file '{missing}'")));
            }
        }

        Ok(())
    }
}
