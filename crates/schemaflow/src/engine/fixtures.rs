//! Fixture documents: parsing and delete-then-insert loading.

use serde_yaml::Value;
use tracing::debug;

use super::Engine;
use crate::driver::{FixtureRow, FixtureValue};
use crate::error::{FlowError, Result};
use crate::repository::RepositoryModel;
use crate::resources::{FixtureSet, ResourceResolver};

/// One `pre_fixture_import` / `post_fixture_import` bracket of rows.
pub type FixtureGroup = Vec<FixtureRow>;

/// Parse a table fixture into its groups.
///
/// A mapping is a single group, a list of mappings is one group per entry,
/// and an empty document has no groups at all.
pub fn parse_table_fixture(table: &str, content: &str) -> Result<Vec<FixtureGroup>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: Value = serde_yaml::from_str(content)?;
    let groups = match document {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(_) => vec![document],
        Value::Sequence(entries) => {
            for entry in &entries {
                if !entry.is_mapping() {
                    return Err(FlowError::runtime(format!(
                        "Bad data for {} fixture group {}",
                        table,
                        render_scalar(entry)
                    )));
                }
            }
            entries
        }
        other => {
            return Err(FlowError::runtime(format!(
                "Bad data for {} fixture payload {}",
                table,
                render_scalar(&other)
            )))
        }
    };

    groups.iter().map(|group| parse_group(table, group)).collect()
}

fn parse_group(table: &str, group: &Value) -> Result<FixtureGroup> {
    let Some(records) = group.as_mapping() else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::with_capacity(records.len());
    for (key, record) in records {
        let name = render_scalar(key);
        let Some(columns) = record.as_mapping() else {
            return Err(FlowError::runtime(format!(
                "Bad data for {} fixture named {} (not map)",
                table, name
            )));
        };

        let mut row = FixtureRow::with_capacity(columns.len());
        for (column, value) in columns {
            let value = FixtureValue::from_yaml(value).map_err(|e| {
                FlowError::runtime(format!(
                    "Bad data for {} fixture named {} column {}: {}",
                    table,
                    name,
                    render_scalar(column),
                    e
                ))
            })?;
            row.push((render_scalar(column), value));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Parse a sequence fixture; `None` for an empty document.
pub fn parse_sequence_fixture(sequence: &str, content: &str) -> Result<Option<i64>> {
    if content.trim().is_empty() {
        return Ok(None);
    }
    let document: Value = serde_yaml::from_str(content)?;
    let value = match &document {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    value.map(Some).ok_or_else(|| {
        FlowError::runtime(format!(
            "Bad sequence fixture for {}: {}",
            sequence,
            render_scalar(&document)
        ))
    })
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

impl Engine {
    /// Reload the fixtures found in `module/subdir`.
    pub(super) async fn load_module_fixtures(
        &mut self,
        resolver: &ResourceResolver,
        repository: &RepositoryModel,
        module: &str,
        subdir: &str,
    ) -> Result<()> {
        let elements = repository.ordered_elements(module)?;
        let fixtures = resolver.collect_fixtures(module, subdir, &elements)?;
        self.unload_fixtures(repository, module, &fixtures).await?;
        self.load_fixtures(resolver, repository, module, &fixtures).await
    }

    /// Delete fixture tables and reset fixture sequences, in reverse order.
    pub(super) async fn unload_fixtures(
        &mut self,
        repository: &RepositoryModel,
        module: &str,
        fixtures: &FixtureSet,
    ) -> Result<()> {
        for table in repository.table_ordering(module)?.iter().rev() {
            if fixtures.contains(table) {
                self.driver
                    .execute(&format!("DELETE FROM {}", table), false)
                    .await?;
            }
        }
        for sequence in repository.sequence_ordering(module)?.iter().rev() {
            if fixtures.contains(sequence) {
                self.driver.update_sequence(sequence, 1).await?;
            }
        }
        Ok(())
    }

    /// Insert fixture tables and set fixture sequences, in forward order.
    pub(super) async fn load_fixtures(
        &mut self,
        resolver: &ResourceResolver,
        repository: &RepositoryModel,
        module: &str,
        fixtures: &FixtureSet,
    ) -> Result<()> {
        for table in repository.table_ordering(module)? {
            if let Some(location) = fixtures.get(table) {
                debug!("Loading fixture {}", location);
                let content = resolver.read_text(location)?;
                self.load_fixture(table, &content).await?;
            }
        }
        for sequence in repository.sequence_ordering(module)? {
            if let Some(location) = fixtures.get(sequence) {
                let content = resolver.read_text(location)?;
                if let Some(value) = parse_sequence_fixture(sequence, &content)? {
                    self.driver.update_sequence(sequence, value).await?;
                }
            }
        }
        Ok(())
    }

    /// Insert every group of one table fixture document.
    pub(super) async fn load_fixture(&mut self, table: &str, content: &str) -> Result<()> {
        let groups = parse_table_fixture(table, content)?;
        for rows in groups {
            self.driver.pre_fixture_import(table).await?;
            for row in &rows {
                self.driver.insert(table, row).await?;
            }
            self.driver.post_fixture_import(table).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_single_mapping_is_one_group() {
        let groups = parse_table_fixture(
            "[dbo].[tblA]",
            "r1:\n  ID: 1\n  Name: first\nr2:\n  ID: 2\n  Name: ~\n",
        )
        .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0],
            vec![
                vec![
                    ("ID".to_string(), FixtureValue::Int(1)),
                    ("Name".to_string(), FixtureValue::Text("first".to_string())),
                ],
                vec![
                    ("ID".to_string(), FixtureValue::Int(2)),
                    ("Name".to_string(), FixtureValue::Null),
                ],
            ]
        );
    }

    #[test]
    fn test_list_of_mappings_is_many_groups() {
        let groups =
            parse_table_fixture("t", "- a:\n    X: 1\n- b:\n    X: 2\n  c:\n    X: 3\n").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 2);
    }

    #[test]
    fn test_empty_document_loads_nothing() {
        assert!(parse_table_fixture("t", "").unwrap().is_empty());
        assert!(parse_table_fixture("t", "~\n").unwrap().is_empty());
    }

    #[test]
    fn test_bad_shapes_are_rejected() {
        let err = parse_table_fixture("t", "r1: 5\n").unwrap_err();
        assert_eq!(err.to_string(), "Runtime error: Bad data for t fixture named r1 (not map)");

        let err = parse_table_fixture("t", "- 7\n").unwrap_err();
        assert_eq!(err.to_string(), "Runtime error: Bad data for t fixture group 7");

        let err = parse_table_fixture("t", "hello\n").unwrap_err();
        assert_eq!(err.to_string(), "Runtime error: Bad data for t fixture payload hello");

        let err = parse_table_fixture("t", "r1:\n  X: [1, 2]\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeExecution);
    }

    #[test]
    fn test_sequence_fixture_values() {
        assert_eq!(parse_sequence_fixture("s", "42\n").unwrap(), Some(42));
        assert_eq!(parse_sequence_fixture("s", "'17'\n").unwrap(), Some(17));
        assert_eq!(parse_sequence_fixture("s", "").unwrap(), None);
        let err = parse_sequence_fixture("s", "abc\n").unwrap_err();
        assert_eq!(err.to_string(), "Runtime error: Bad sequence fixture for s: abc");
    }
}
