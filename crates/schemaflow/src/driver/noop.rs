//! Driver that performs no database work.
//!
//! Useful for exercising resource resolution and ordering without a server.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::warn;

use super::{ConnectionSettings, DatabaseDriver, FixtureRow};
use crate::database::ImportDefinition;
use crate::driver::sqlserver;
use crate::error::Result;

/// No-op driver: every operation succeeds without effect.
///
/// Logs a warning on first use.
pub struct NoOpDriver {
    warned: AtomicBool,
}

impl NoOpDriver {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!("Using no-op database driver: no SQL will be executed against any server.");
        }
    }
}

impl Default for NoOpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for NoOpDriver {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn open(&mut self, _settings: &ConnectionSettings, _control: bool) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn drop_database(&mut self, _settings: &ConnectionSettings) -> Result<()> {
        Ok(())
    }

    async fn create_database(&mut self, _settings: &ConnectionSettings) -> Result<()> {
        Ok(())
    }

    async fn create_schema(&mut self, _schema: &str) -> Result<()> {
        Ok(())
    }

    async fn drop_schema(&mut self, _schema: &str, _tables: &[String]) -> Result<()> {
        Ok(())
    }

    async fn execute(&mut self, _sql: &str, _control: bool) -> Result<()> {
        Ok(())
    }

    async fn pre_fixture_import(&mut self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn insert(&mut self, _table: &str, _row: &FixtureRow) -> Result<()> {
        Ok(())
    }

    async fn post_fixture_import(&mut self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn update_sequence(&mut self, _sequence: &str, _value: i64) -> Result<()> {
        Ok(())
    }

    async fn pre_table_import(&mut self, _import: &ImportDefinition, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn post_table_import(&mut self, _import: &ImportDefinition, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn post_data_module_import(
        &mut self,
        _import: &ImportDefinition,
        _module: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn post_database_import(&mut self, _import: &ImportDefinition) -> Result<()> {
        Ok(())
    }

    async fn column_names_for_table(&mut self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn setup_migrations(&mut self) -> Result<()> {
        Ok(())
    }

    async fn should_migrate(&mut self, _namespace: &str, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn mark_migration_as_run(&mut self, _namespace: &str, _name: &str) -> Result<()> {
        Ok(())
    }

    fn standard_import_sql(
        &self,
        table: &str,
        target_database: &str,
        source_database: &str,
        columns: &[String],
    ) -> Result<String> {
        Ok(sqlserver::table_import_sql(table, target_database, source_database, columns))
    }

    fn standard_sequence_import_sql(
        &self,
        sequence: &str,
        target_database: &str,
        source_database: &str,
    ) -> Result<String> {
        Ok(sqlserver::sequence_import_sql(sequence, target_database, source_database))
    }
}
