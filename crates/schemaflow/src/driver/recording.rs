//! Test double that records every driver call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ConnectionSettings, DatabaseDriver, FixtureRow, FixtureValue};
use crate::database::ImportDefinition;
use crate::error::{FlowError, Result};

/// Records calls as readable strings into a log shared with the test.
#[derive(Default)]
pub(crate) struct RecordingDriver {
    log: Arc<Mutex<Vec<String>>>,
    pub(crate) columns: Vec<String>,
    pub(crate) applied_migrations: HashSet<String>,
    pub(crate) fail_on_execute: Option<String>,
}

impl RecordingDriver {
    pub(crate) fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let driver = Self::default();
        let log = Arc::clone(&driver.log);
        (driver, log)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

fn render(value: &FixtureValue) -> String {
    match value {
        FixtureValue::Null => "null".to_string(),
        FixtureValue::Bool(b) => b.to_string(),
        FixtureValue::Int(i) => i.to_string(),
        FixtureValue::Float(f) => f.to_string(),
        FixtureValue::Text(s) => s.clone(),
    }
}

#[async_trait]
impl DatabaseDriver for RecordingDriver {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn open(&mut self, settings: &ConnectionSettings, control: bool) -> Result<()> {
        self.record(format!("open {} control={}", settings.database, control));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }

    async fn drop_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.record(format!("drop_database {}", settings.database));
        Ok(())
    }

    async fn create_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.record(format!("create_database {}", settings.database));
        Ok(())
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        self.record(format!("create_schema {}", schema));
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str, tables: &[String]) -> Result<()> {
        self.record(format!("drop_schema {} [{}]", schema, tables.join(", ")));
        Ok(())
    }

    async fn execute(&mut self, sql: &str, control: bool) -> Result<()> {
        if let Some(marker) = &self.fail_on_execute {
            if sql.contains(marker.as_str()) {
                self.record(format!("execute failed {}", sql.trim()));
                return Err(FlowError::runtime(format!("Failed to execute {}", sql.trim())));
            }
        }
        let suffix = if control { " (control)" } else { "" };
        self.record(format!("execute {}{}", sql.trim(), suffix));
        Ok(())
    }

    async fn pre_fixture_import(&mut self, table: &str) -> Result<()> {
        self.record(format!("pre_fixture_import {}", table));
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: &FixtureRow) -> Result<()> {
        let values: Vec<String> = row
            .iter()
            .map(|(column, value)| format!("{}={}", column, render(value)))
            .collect();
        self.record(format!("insert {} {}", table, values.join(",")));
        Ok(())
    }

    async fn post_fixture_import(&mut self, table: &str) -> Result<()> {
        self.record(format!("post_fixture_import {}", table));
        Ok(())
    }

    async fn update_sequence(&mut self, sequence: &str, value: i64) -> Result<()> {
        self.record(format!("update_sequence {} {}", sequence, value));
        Ok(())
    }

    async fn pre_table_import(&mut self, import: &ImportDefinition, table: &str) -> Result<()> {
        self.record(format!("pre_table_import {} {}", import.key, table));
        Ok(())
    }

    async fn post_table_import(&mut self, import: &ImportDefinition, table: &str) -> Result<()> {
        self.record(format!("post_table_import {} {}", import.key, table));
        Ok(())
    }

    async fn post_data_module_import(
        &mut self,
        import: &ImportDefinition,
        module: &str,
    ) -> Result<()> {
        self.record(format!("post_data_module_import {} {}", import.key, module));
        Ok(())
    }

    async fn post_database_import(&mut self, import: &ImportDefinition) -> Result<()> {
        self.record(format!("post_database_import {}", import.key));
        Ok(())
    }

    async fn column_names_for_table(&mut self, _table: &str) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    async fn setup_migrations(&mut self) -> Result<()> {
        self.record("setup_migrations".to_string());
        Ok(())
    }

    async fn should_migrate(&mut self, _namespace: &str, name: &str) -> Result<bool> {
        Ok(!self.applied_migrations.contains(name))
    }

    async fn mark_migration_as_run(&mut self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("mark_migration_as_run {} {}", namespace, name));
        Ok(())
    }

    fn standard_import_sql(
        &self,
        table: &str,
        target_database: &str,
        source_database: &str,
        columns: &[String],
    ) -> Result<String> {
        Ok(format!(
            "IMPORT {} {}<-{} ({})",
            table,
            target_database,
            source_database,
            columns.join(",")
        ))
    }

    fn standard_sequence_import_sql(
        &self,
        sequence: &str,
        target_database: &str,
        source_database: &str,
    ) -> Result<String> {
        Ok(format!(
            "IMPORT SEQUENCE {} {}<-{}",
            sequence, target_database, source_database
        ))
    }
}
