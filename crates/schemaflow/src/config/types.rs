//! Project configuration type definitions.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Root project configuration (`schemaflow.yml`).
///
/// Every key is optional; absent keys take the conventional directory layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    /// Disk search roots, relative to the project directory.
    #[serde(default = "default_search_dirs")]
    pub search_dirs: Vec<String>,

    /// Per-module directories run when a module is brought up.
    #[serde(default = "default_up_dirs")]
    pub up_dirs: Vec<String>,

    /// Per-module directories run when a module is taken down.
    #[serde(default = "default_down_dirs")]
    pub down_dirs: Vec<String>,

    /// Per-module directories run after every module is up.
    #[serde(default = "default_finalize_dirs")]
    pub finalize_dirs: Vec<String>,

    /// Database-wide hook directories run before any module.
    #[serde(default = "default_pre_create_dirs")]
    pub pre_create_dirs: Vec<String>,

    /// Database-wide hook directories run after every module.
    #[serde(default = "default_post_create_dirs")]
    pub post_create_dirs: Vec<String>,

    /// Declared dataset names.
    #[serde(default)]
    pub datasets: Vec<String>,

    /// Directory holding dataset fixtures and hooks.
    #[serde(default = "default_datasets_dir_name")]
    pub datasets_dir_name: String,

    /// Hook directories (inside each dataset) run before loading it.
    #[serde(default = "default_pre_dataset_dirs")]
    pub pre_dataset_dirs: Vec<String>,

    /// Hook directories (inside each dataset) run after loading it.
    #[serde(default = "default_post_dataset_dirs")]
    pub post_dataset_dirs: Vec<String>,

    /// Per-module fixture directory.
    #[serde(default = "default_fixture_dir_name")]
    pub fixture_dir_name: String,

    /// Enable the migration ledger.
    #[serde(default)]
    pub migrations: bool,

    /// Record (rather than run) migrations when creating a database.
    /// Defaults to the value of `migrations`.
    #[serde(default)]
    pub migrations_applied_at_create: Option<bool>,

    /// Database-wide migrations directory.
    #[serde(default = "default_migrations_dir_name")]
    pub migrations_dir_name: String,

    /// Name of the optional ordering file in each directory.
    #[serde(default = "default_index_file_name")]
    pub index_file_name: String,

    /// Release label used to bound migrations.
    #[serde(default)]
    pub version: Option<String>,

    /// Import used when none is named on the command line.
    #[serde(default = "default_import_key")]
    pub default_import: String,

    /// Lower-priority archive overlays (zip paths).
    #[serde(default)]
    pub pre_db_artifacts: Vec<String>,

    /// Highest-priority archive overlays (zip paths).
    #[serde(default)]
    pub post_db_artifacts: Vec<String>,

    /// Textual substitutions applied to every SQL file.
    #[serde(default)]
    pub filter_properties: BTreeMap<String, FilterPropertyConfig>,

    /// Cross-database import definitions.
    #[serde(default)]
    pub imports: BTreeMap<String, ImportConfig>,

    /// Named module subsets.
    #[serde(default)]
    pub module_groups: BTreeMap<String, ModuleGroupConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            search_dirs: default_search_dirs(),
            up_dirs: default_up_dirs(),
            down_dirs: default_down_dirs(),
            finalize_dirs: default_finalize_dirs(),
            pre_create_dirs: default_pre_create_dirs(),
            post_create_dirs: default_post_create_dirs(),
            datasets: Vec::new(),
            datasets_dir_name: default_datasets_dir_name(),
            pre_dataset_dirs: default_pre_dataset_dirs(),
            post_dataset_dirs: default_post_dataset_dirs(),
            fixture_dir_name: default_fixture_dir_name(),
            migrations: false,
            migrations_applied_at_create: None,
            migrations_dir_name: default_migrations_dir_name(),
            index_file_name: default_index_file_name(),
            version: None,
            default_import: default_import_key(),
            pre_db_artifacts: Vec::new(),
            post_db_artifacts: Vec::new(),
            filter_properties: BTreeMap::new(),
            imports: BTreeMap::new(),
            module_groups: BTreeMap::new(),
        }
    }
}

/// A textual substitution applied to SQL before execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterPropertyConfig {
    /// Literal text replaced in SQL.
    pub pattern: String,

    /// Value used when none is supplied at invocation.
    #[serde(default)]
    pub default: Option<String>,

    /// Allowed values; unrestricted when absent.
    #[serde(default)]
    pub supported_values: Option<Vec<String>>,
}

/// An import definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportConfig {
    /// Modules to import; all repository modules when absent.
    #[serde(default)]
    pub modules: Option<Vec<String>>,

    /// Per-module directory holding import overrides.
    #[serde(default = "default_import_dir")]
    pub dir: String,

    /// Database-wide hooks run before the import.
    #[serde(default = "default_pre_import_dirs")]
    pub pre_import_dirs: Vec<String>,

    /// Database-wide hooks run after the import.
    #[serde(default = "default_post_import_dirs")]
    pub post_import_dirs: Vec<String>,
}

/// A module group as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleGroupConfig {
    pub modules: Vec<String>,

    #[serde(default)]
    pub import_enabled: bool,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_search_dirs() -> Vec<String> {
    strings(&["."])
}

fn default_up_dirs() -> Vec<String> {
    strings(&[".", "types", "views", "functions", "stored-procedures", "misc"])
}

fn default_down_dirs() -> Vec<String> {
    strings(&["down"])
}

fn default_finalize_dirs() -> Vec<String> {
    strings(&["triggers", "finalize"])
}

fn default_pre_create_dirs() -> Vec<String> {
    strings(&["db-hooks/pre"])
}

fn default_post_create_dirs() -> Vec<String> {
    strings(&["db-hooks/post"])
}

fn default_datasets_dir_name() -> String {
    "datasets".to_string()
}

fn default_pre_dataset_dirs() -> Vec<String> {
    strings(&["pre"])
}

fn default_post_dataset_dirs() -> Vec<String> {
    strings(&["post"])
}

fn default_fixture_dir_name() -> String {
    "fixtures".to_string()
}

fn default_migrations_dir_name() -> String {
    "migrations".to_string()
}

fn default_index_file_name() -> String {
    "index.txt".to_string()
}

fn default_import_key() -> String {
    "default".to_string()
}

fn default_import_dir() -> String {
    "import".to_string()
}

fn default_pre_import_dirs() -> Vec<String> {
    strings(&["import-hooks/pre"])
}

fn default_post_import_dirs() -> Vec<String> {
    strings(&["import-hooks/post"])
}
