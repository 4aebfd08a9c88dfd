//! Project configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{FlowError, Result};
use crate::repository::RepositoryModel;
use std::path::Path;

/// Default project configuration file name.
pub const PROJECT_CONFIG_FILE: &str = "schemaflow.yml";

impl ProjectConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::io_at("Failed to read", path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ProjectConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration on its own.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Validate module references against the merged repository.
    pub fn validate_against(&self, repository: &RepositoryModel) -> Result<()> {
        validation::validate_module_references(self, repository)
    }

    /// Whether migrations are recorded instead of run at create time.
    pub fn migrations_applied_at_create(&self) -> bool {
        self.migrations_applied_at_create.unwrap_or(self.migrations)
    }
}
