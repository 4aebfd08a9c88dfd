//! Configuration validation.

use std::collections::{BTreeMap, HashSet};

use super::ProjectConfig;
use crate::error::{FlowError, Result};
use crate::repository::RepositoryModel;

const RESERVED_FILTER_KEYS: [&str; 3] = ["sourceDatabase", "targetDatabase", "table"];
const RESERVED_FILTER_PATTERNS: [&str; 3] = ["__SOURCE__", "__TARGET__", "__TABLE__"];

/// Validate the configuration.
pub fn validate(config: &ProjectConfig) -> Result<()> {
    if config.search_dirs.is_empty() {
        return Err(FlowError::config("searchDirs must not be empty"));
    }
    for (key, value) in [
        ("datasetsDirName", &config.datasets_dir_name),
        ("fixtureDirName", &config.fixture_dir_name),
        ("migrationsDirName", &config.migrations_dir_name),
        ("indexFileName", &config.index_file_name),
    ] {
        if value.trim().is_empty() {
            return Err(FlowError::config(format!("{} must not be empty", key)));
        }
    }

    let mut seen = HashSet::new();
    for dataset in &config.datasets {
        if !seen.insert(dataset) {
            return Err(FlowError::config(format!(
                "Dataset '{}' is declared more than once",
                dataset
            )));
        }
    }

    for (key, import) in &config.imports {
        if import.dir.trim().is_empty() {
            return Err(FlowError::config(format!(
                "imports.{}.dir must not be empty",
                key
            )));
        }
    }

    validate_filter_properties(config)
}

fn validate_filter_properties(config: &ProjectConfig) -> Result<()> {
    let mut pattern_owners: BTreeMap<&str, &str> = BTreeMap::new();
    for (key, property) in &config.filter_properties {
        let path = format!("filterProperties.{}", key);
        if RESERVED_FILTER_KEYS.contains(&key.as_str()) {
            return Err(FlowError::config(format!(
                "Filter property '{}' in filterProperties is reserved and tool-provided.",
                key
            )));
        }
        if property.pattern.trim().is_empty() {
            return Err(FlowError::config(format!(
                "Filter property '{}' in {} must define a non-empty pattern.",
                key, path
            )));
        }
        if RESERVED_FILTER_PATTERNS.contains(&property.pattern.as_str()) {
            return Err(FlowError::config(format!(
                "Filter property '{}' in {} defines reserved pattern '{}'.",
                key, path, property.pattern
            )));
        }
        if let Some(owner) = pattern_owners.insert(&property.pattern, key) {
            return Err(FlowError::config(format!(
                "Duplicate filter pattern '{}' declared for '{}' and '{}' in filterProperties.",
                property.pattern, key, owner
            )));
        }

        if let Some(supported) = &property.supported_values {
            if supported.is_empty() {
                return Err(FlowError::config(format!(
                    "Filter property '{}' in {} must define non-empty 'supportedValues' when specified.",
                    key, path
                )));
            }
            let unique: HashSet<&String> = supported.iter().collect();
            if unique.len() != supported.len() {
                return Err(FlowError::config(format!(
                    "Filter property '{}' in {} contains duplicate entries in 'supportedValues'.",
                    key, path
                )));
            }
            if let Some(default) = &property.default {
                if !supported.contains(default) {
                    return Err(FlowError::config(format!(
                        "Filter property '{}' in {} declares default '{}' not present in supportedValues {:?}.",
                        key, path, default, supported
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Check that every module named by an import or module group exists.
pub fn validate_module_references(
    config: &ProjectConfig,
    repository: &RepositoryModel,
) -> Result<()> {
    for (key, import) in &config.imports {
        if let Some(modules) = &import.modules {
            check_modules(modules, repository, "import", key)?;
        }
    }
    for (key, group) in &config.module_groups {
        check_modules(&group.modules, repository, "module group", key)?;
    }
    Ok(())
}

fn check_modules(
    modules: &[String],
    repository: &RepositoryModel,
    context: &str,
    key: &str,
) -> Result<()> {
    for module in modules {
        if !repository.contains_module(module) {
            return Err(FlowError::config(format!(
                "Module '{}' in {} '{}' for database 'default' is not present in repository modules {:?}.",
                module,
                context,
                key,
                repository.modules()
            )));
        }
    }
    Ok(())
}
