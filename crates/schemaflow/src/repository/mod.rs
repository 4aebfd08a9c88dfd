//! Repository catalogue: the ordered set of modules that make up a database.
//!
//! A [`RepositoryModel`] is built once per invocation, either from a
//! `repository.yml` document (see [`loader`]) or by merging several
//! catalogues together (see [`merge`]), and is never mutated afterwards.

pub mod loader;
pub mod merge;

use std::collections::HashMap;

use crate::error::{FlowError, Result};

pub use loader::{load_repository, to_yaml};
pub use merge::merge;

/// A single module as declared in a catalogue document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    /// Module name, unique within a repository.
    pub name: String,
    /// Schema name when it differs from the module name.
    pub schema: Option<String>,
    /// Tables in creation order.
    pub tables: Vec<String>,
    /// Sequences in creation order.
    pub sequences: Vec<String>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            tables: Vec::new(),
            sequences: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sequences<I, S>(mut self, sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sequences = sequences.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable catalogue of modules.
///
/// Every module listed in `modules` has an entry in the table and sequence
/// maps (possibly empty). Schema overrides are only stored when the schema
/// differs from the module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryModel {
    modules: Vec<String>,
    schema_overrides: HashMap<String, String>,
    tables: HashMap<String, Vec<String>>,
    sequences: HashMap<String, Vec<String>>,
}

impl RepositoryModel {
    /// An empty catalogue.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a catalogue from module definitions, preserving their order.
    ///
    /// Fails if the same module name appears twice.
    pub fn from_modules(definitions: impl IntoIterator<Item = ModuleDefinition>) -> Result<Self> {
        let mut model = Self::default();
        for definition in definitions {
            if model.contains_module(&definition.name) {
                return Err(FlowError::config(format!(
                    "Duplicate repository module '{}'",
                    definition.name
                )));
            }
            if let Some(schema) = definition.schema {
                if schema != definition.name {
                    model
                        .schema_overrides
                        .insert(definition.name.clone(), schema);
                }
            }
            model
                .tables
                .insert(definition.name.clone(), definition.tables);
            model
                .sequences
                .insert(definition.name.clone(), definition.sequences);
            model.modules.push(definition.name);
        }
        Ok(model)
    }

    /// Module names in declared order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }

    /// Schema override for a module, if one was declared.
    pub fn schema_override(&self, module: &str) -> Option<&str> {
        self.schema_overrides.get(module).map(String::as_str)
    }

    /// Schema name for a module: the override if present, else the module name.
    pub fn schema_name_for_module(&self, module: &str) -> Result<&str> {
        if let Some(schema) = self.schema_overrides.get(module) {
            return Ok(schema);
        }
        self.modules
            .iter()
            .find(|m| m.as_str() == module)
            .map(String::as_str)
            .ok_or_else(|| unknown_module(module))
    }

    /// Tables of a module in declared order.
    pub fn table_ordering(&self, module: &str) -> Result<&[String]> {
        self.tables
            .get(module)
            .map(Vec::as_slice)
            .ok_or_else(|| unknown_module(module))
    }

    /// Sequences of a module in declared order.
    pub fn sequence_ordering(&self, module: &str) -> Result<&[String]> {
        self.sequences
            .get(module)
            .map(Vec::as_slice)
            .ok_or_else(|| unknown_module(module))
    }

    /// Tables followed by sequences for a module.
    pub fn ordered_elements(&self, module: &str) -> Result<Vec<String>> {
        let mut elements = self.table_ordering(module)?.to_vec();
        elements.extend_from_slice(self.sequence_ordering(module)?);
        Ok(elements)
    }

    /// Reconstruct the module definitions in declared order.
    pub fn definitions(&self) -> Vec<ModuleDefinition> {
        self.modules
            .iter()
            .map(|name| ModuleDefinition {
                name: name.clone(),
                schema: self.schema_overrides.get(name).cloned(),
                tables: self.tables.get(name).cloned().unwrap_or_default(),
                sequences: self.sequences.get(name).cloned().unwrap_or_default(),
            })
            .collect()
    }
}

fn unknown_module(module: &str) -> FlowError {
    FlowError::config(format!("Module '{}' is not defined in the repository", module))
}
