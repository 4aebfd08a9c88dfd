//! The assembled, read-only database model.
//!
//! A [`DatabaseModel`] combines the merged repository catalogue with the
//! project's directory conventions, archive overlays, datasets, imports,
//! module groups and filter properties. It is built once per invocation by
//! [`ProjectLoader`] and shared by reference with the engine and packager.

pub mod loader;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::{FilterPropertyConfig, ProjectConfig};
use crate::error::{FlowError, Result};
use crate::repository::RepositoryModel;
use crate::resources::{ArchiveOverlay, ResourceResolver};

pub use loader::ProjectLoader;

/// Key of the only supported database.
pub const DEFAULT_DATABASE_KEY: &str = "default";

/// A cross-database import definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDefinition {
    pub key: String,
    /// Modules to import, in repository order.
    pub modules: Vec<String>,
    /// Per-module directory holding import overrides.
    pub dir: String,
    pub pre_import_dirs: Vec<String>,
    pub post_import_dirs: Vec<String>,
}

/// A named subset of modules that can be brought up or down together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleGroup {
    pub key: String,
    pub modules: Vec<String>,
    pub import_enabled: bool,
}

/// Fully assembled model of one database.
#[derive(Debug, Clone)]
pub struct DatabaseModel {
    pub key: String,
    pub repository: RepositoryModel,
    pub search_dirs: Vec<PathBuf>,
    pub pre_overlays: Vec<Arc<ArchiveOverlay>>,
    pub post_overlays: Vec<Arc<ArchiveOverlay>>,
    pub up_dirs: Vec<String>,
    pub down_dirs: Vec<String>,
    pub finalize_dirs: Vec<String>,
    pub pre_create_dirs: Vec<String>,
    pub post_create_dirs: Vec<String>,
    pub datasets: Vec<String>,
    pub datasets_dir_name: String,
    pub pre_dataset_dirs: Vec<String>,
    pub post_dataset_dirs: Vec<String>,
    pub fixture_dir_name: String,
    pub migrations: bool,
    pub migrations_applied_at_create: bool,
    pub migrations_dir_name: String,
    pub index_file_name: String,
    pub version: Option<String>,
    pub schema_hash: Option<String>,
    pub default_import: String,
    pub filter_properties: BTreeMap<String, FilterPropertyConfig>,
    pub imports: BTreeMap<String, ImportDefinition>,
    pub module_groups: BTreeMap<String, ModuleGroup>,
    resolver: ResourceResolver,
}

impl DatabaseModel {
    /// Assemble a model from validated configuration and a merged repository.
    pub fn from_parts(
        config: &ProjectConfig,
        repository: RepositoryModel,
        search_dirs: Vec<PathBuf>,
        pre_overlays: Vec<Arc<ArchiveOverlay>>,
        post_overlays: Vec<Arc<ArchiveOverlay>>,
    ) -> Result<Self> {
        let imports = config
            .imports
            .iter()
            .map(|(key, import)| {
                let modules = match &import.modules {
                    Some(selected) => repository
                        .modules()
                        .iter()
                        .filter(|m| selected.contains(m))
                        .cloned()
                        .collect(),
                    None => repository.modules().to_vec(),
                };
                let definition = ImportDefinition {
                    key: key.clone(),
                    modules,
                    dir: import.dir.clone(),
                    pre_import_dirs: import.pre_import_dirs.clone(),
                    post_import_dirs: import.post_import_dirs.clone(),
                };
                (key.clone(), definition)
            })
            .collect();

        let module_groups = config
            .module_groups
            .iter()
            .map(|(key, group)| {
                let definition = ModuleGroup {
                    key: key.clone(),
                    modules: group.modules.clone(),
                    import_enabled: group.import_enabled,
                };
                (key.clone(), definition)
            })
            .collect();

        let schema_hash = Some(schema_hash(&repository)?);
        let resolver = ResourceResolver::new(
            search_dirs.clone(),
            post_overlays.clone(),
            pre_overlays.clone(),
            config.index_file_name.clone(),
        );

        Ok(Self {
            key: DEFAULT_DATABASE_KEY.to_string(),
            repository,
            search_dirs,
            pre_overlays,
            post_overlays,
            up_dirs: config.up_dirs.clone(),
            down_dirs: config.down_dirs.clone(),
            finalize_dirs: config.finalize_dirs.clone(),
            pre_create_dirs: config.pre_create_dirs.clone(),
            post_create_dirs: config.post_create_dirs.clone(),
            datasets: config.datasets.clone(),
            datasets_dir_name: config.datasets_dir_name.clone(),
            pre_dataset_dirs: config.pre_dataset_dirs.clone(),
            post_dataset_dirs: config.post_dataset_dirs.clone(),
            fixture_dir_name: config.fixture_dir_name.clone(),
            migrations: config.migrations,
            migrations_applied_at_create: config.migrations_applied_at_create(),
            migrations_dir_name: config.migrations_dir_name.clone(),
            index_file_name: config.index_file_name.clone(),
            version: config.version.clone(),
            schema_hash,
            default_import: config.default_import.clone(),
            filter_properties: config.filter_properties.clone(),
            imports,
            module_groups,
            resolver,
        })
    }

    /// The resolver over this database's search roots and overlays.
    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn modules(&self) -> &[String] {
        self.repository.modules()
    }

    /// Check that `name` is a declared dataset.
    pub fn require_dataset(&self, name: &str) -> Result<()> {
        if self.datasets.iter().any(|d| d == name) {
            Ok(())
        } else {
            Err(FlowError::runtime(format!("Unknown dataset '{}'", name)))
        }
    }

    /// Logical directory of a dataset's fixtures.
    pub fn dataset_dir(&self, name: &str) -> String {
        format!("{}/{}", self.datasets_dir_name, name)
    }

    pub fn import(&self, key: &str) -> Result<&ImportDefinition> {
        self.imports.get(key).ok_or_else(|| {
            FlowError::runtime(format!(
                "Unable to locate import definition by key '{}'",
                key
            ))
        })
    }

    pub fn module_group(&self, key: &str) -> Result<&ModuleGroup> {
        self.module_groups.get(key).ok_or_else(|| {
            FlowError::runtime(format!(
                "Unable to locate module group definition by key '{}'",
                key
            ))
        })
    }

    /// Resolve every filter property to a `(pattern, value)` pair.
    ///
    /// Supplied values win over defaults. Undeclared keys, values outside
    /// `supportedValues` and properties with no value at all are rejected.
    pub fn resolve_filters(
        &self,
        supplied: &BTreeMap<String, String>,
    ) -> Result<Vec<(String, String)>> {
        if let Some(unknown) = supplied
            .keys()
            .find(|key| !self.filter_properties.contains_key(*key))
        {
            return Err(FlowError::config(format!(
                "Unknown filter property '{}' supplied. Declared properties: {:?}",
                unknown,
                self.filter_properties.keys().collect::<Vec<_>>()
            )));
        }

        let mut resolved = Vec::with_capacity(self.filter_properties.len());
        for (key, property) in &self.filter_properties {
            let value = match (supplied.get(key), &property.default) {
                (Some(value), _) => {
                    if let Some(supported) = &property.supported_values {
                        if !supported.contains(value) {
                            return Err(FlowError::config(format!(
                                "Filter property '{}' value '{}' is not one of the supported values {:?}.",
                                key, value, supported
                            )));
                        }
                    }
                    value.clone()
                }
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(FlowError::config(format!(
                        "Filter property '{}' has no value supplied and no default.",
                        key
                    )))
                }
            };
            resolved.push((property.pattern.clone(), value));
        }
        Ok(resolved)
    }
}

/// Fingerprint of the repository's structural shape.
///
/// One line per module, `module|schema|t1,t2|s1,s2`, hashed with SHA-256.
pub fn schema_hash(repository: &RepositoryModel) -> Result<String> {
    let mut content = String::new();
    for module in repository.modules() {
        let _ = writeln!(
            content,
            "{}|{}|{}|{}",
            module,
            repository.schema_name_for_module(module)?,
            repository.table_ordering(module)?.join(","),
            repository.sequence_ordering(module)?.join(",")
        );
    }
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
