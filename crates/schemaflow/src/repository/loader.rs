//! Reading and writing `repository.yml` catalogue documents.

use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::Value;

use super::{ModuleDefinition, RepositoryModel};
use crate::error::{FlowError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogueDocument {
    #[serde(default)]
    modules: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleBody {
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    sequences: Vec<String>,
}

/// Parse a catalogue document.
///
/// `source` names the document in error messages. A document without a
/// `modules` key yields an empty catalogue.
pub fn load_repository(yaml: &str, source: &str) -> Result<RepositoryModel> {
    if yaml.trim().is_empty() {
        return Ok(RepositoryModel::empty());
    }
    let root: Value = serde_yaml::from_str(yaml)
        .map_err(|e| FlowError::config(format!("Invalid YAML in {}: {}", source, e)))?;
    if root.is_null() {
        return Ok(RepositoryModel::empty());
    }
    let document: CatalogueDocument = serde_yaml::from_value(root)
        .map_err(|e| FlowError::config(format!("Invalid repository in {}: {}", source, e)))?;

    let path = format!("{}.modules", source);
    let mut definitions = Vec::new();
    match document.modules {
        Value::Null => {}
        Value::Sequence(entries) => {
            for (i, entry) in entries.into_iter().enumerate() {
                let Value::Mapping(mapping) = entry else {
                    return Err(FlowError::config(format!(
                        "Expected module map at {}[{}].",
                        path, i
                    )));
                };
                if mapping.len() != 1 {
                    return Err(FlowError::config(format!(
                        "Expected single module entry at {}[{}].",
                        path, i
                    )));
                }
                for (name, body) in mapping {
                    definitions.push(module_definition(name, body, &path)?);
                }
            }
        }
        Value::Mapping(mapping) => {
            for (name, body) in mapping {
                definitions.push(module_definition(name, body, &path)?);
            }
        }
        _ => {
            return Err(FlowError::config(format!(
                "Expected list or map for {}.",
                path
            )))
        }
    }

    RepositoryModel::from_modules(definitions).map_err(|e| match e {
        FlowError::Config(message) => FlowError::config(format!("{} in {}.", message, source)),
        other => other,
    })
}

fn module_definition(name: Value, body: Value, path: &str) -> Result<ModuleDefinition> {
    let Value::String(name) = name else {
        return Err(FlowError::config(format!(
            "Expected string module name at {}.",
            path
        )));
    };
    let body: ModuleBody = match body {
        Value::Null => ModuleBody::default(),
        Value::Mapping(_) => serde_yaml::from_value(body).map_err(|e| {
            FlowError::config(format!("Invalid module '{}' at {}: {}", name, path, e))
        })?,
        _ => {
            return Err(FlowError::config(format!(
                "Expected map body for module '{}' at {}.",
                name, path
            )))
        }
    };
    Ok(ModuleDefinition {
        name,
        schema: body.schema,
        tables: body.tables,
        sequences: body.sequences,
    })
}

#[derive(Serialize)]
struct CatalogueOutput<'a> {
    modules: OrderedModules<'a>,
}

/// Modules as a mapping that keeps declaration order.
struct OrderedModules<'a>(&'a [ModuleDefinition]);

impl Serialize for OrderedModules<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|definition| {
            (
                definition.name.as_str(),
                ModuleOutput {
                    schema: definition.schema.as_deref(),
                    tables: &definition.tables,
                    sequences: &definition.sequences,
                },
            )
        }))
    }
}

#[derive(Serialize)]
struct ModuleOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    tables: &'a [String],
    sequences: &'a [String],
}

/// Serialize a catalogue in the form [`load_repository`] reads back.
pub fn to_yaml(model: &RepositoryModel) -> Result<String> {
    let definitions = model.definitions();
    let document = CatalogueOutput {
        modules: OrderedModules(&definitions),
    };
    Ok(serde_yaml::to_string(&document)?)
}
