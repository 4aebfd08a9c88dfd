//! Builds a [`DatabaseModel`] from a project directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::{DatabaseModel, DEFAULT_DATABASE_KEY};
use crate::config::{ProjectConfig, PROJECT_CONFIG_FILE};
use crate::error::{FlowError, Result};
use crate::repository::{load_repository, merge, RepositoryModel};
use crate::resources::ArchiveOverlay;

/// Catalogue file name, both on disk and inside overlays.
pub const REPOSITORY_FILE: &str = "repository.yml";

/// Loads project configuration, overlays and catalogues into a [`DatabaseModel`].
#[derive(Debug, Clone)]
pub struct ProjectLoader {
    project_dir: PathBuf,
    database: Option<String>,
}

impl ProjectLoader {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            database: None,
        }
    }

    /// Select a database key; only `default` is supported.
    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Read `schemaflow.yml`, open overlays, merge catalogues and assemble the model.
    pub fn load(&self) -> Result<DatabaseModel> {
        if let Some(database) = &self.database {
            if database != DEFAULT_DATABASE_KEY {
                return Err(FlowError::config(format!(
                    "Unknown database '{}'. Only '{}' is supported.",
                    database, DEFAULT_DATABASE_KEY
                )));
            }
        }

        let config = ProjectConfig::load(self.project_dir.join(PROJECT_CONFIG_FILE))?;

        let pre_overlays = self.open_overlays(&config.pre_db_artifacts)?;
        let post_overlays = self.open_overlays(&config.post_db_artifacts)?;

        let pre_models = overlay_repositories(&pre_overlays)?;
        let post_models = overlay_repositories(&post_overlays)?;
        let local = self.local_repository()?;

        let repository = merge(&pre_models, &local, &post_models)?;
        if repository.is_empty() {
            return Err(FlowError::config(format!(
                "No repository modules defined for database '{}'",
                DEFAULT_DATABASE_KEY
            )));
        }
        config.validate_against(&repository)?;

        let search_dirs = config
            .search_dirs
            .iter()
            .map(|dir| self.project_dir.join(dir))
            .collect();

        let model =
            DatabaseModel::from_parts(&config, repository, search_dirs, pre_overlays, post_overlays)?;
        info!(
            "Loaded database '{}' with {} modules from {}",
            model.key,
            model.modules().len(),
            self.project_dir.display()
        );
        Ok(model)
    }

    fn open_overlays(&self, artifacts: &[String]) -> Result<Vec<Arc<ArchiveOverlay>>> {
        artifacts
            .iter()
            .map(|artifact| {
                let path = self.project_dir.join(artifact);
                if !path.is_file() {
                    return Err(FlowError::config(format!(
                        "Database artifact '{}' does not exist at {}",
                        artifact,
                        path.display()
                    )));
                }
                debug!("Opening database artifact {}", path.display());
                ArchiveOverlay::open(artifact.clone(), &path).map(Arc::new)
            })
            .collect()
    }

    fn local_repository(&self) -> Result<RepositoryModel> {
        let path = self.project_dir.join(REPOSITORY_FILE);
        if !path.is_file() {
            return Ok(RepositoryModel::empty());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| FlowError::io_at("Failed to read", &path, e))?;
        load_repository(&content, &path.display().to_string())
    }
}

fn overlay_repositories(overlays: &[Arc<ArchiveOverlay>]) -> Result<Vec<RepositoryModel>> {
    overlays
        .iter()
        .map(|overlay| {
            if !overlay.contains(REPOSITORY_FILE) {
                return Err(FlowError::config(format!(
                    "Database artifact '{}' does not contain {}",
                    overlay.id(),
                    REPOSITORY_FILE
                )));
            }
            let content = overlay.read_text(REPOSITORY_FILE)?;
            load_repository(&content, &format!("zip:{}:{}", overlay.id(), REPOSITORY_FILE))
        })
        .collect()
}
