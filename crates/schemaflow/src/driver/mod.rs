//! Database driver abstraction.
//!
//! The [`DatabaseDriver`] trait is the only place dialect-specific SQL lives.
//! The engine drives it strictly sequentially and owns it exclusively for the
//! duration of an operation:
//!
//! - **SQL Server**: [`SqlServerDriver`], tiberius over a single-connection bb8 pool
//! - **PostgreSQL**: [`PostgresDriver`], tokio-postgres over a single-connection deadpool pool
//! - **No-op**: [`NoOpDriver`], accepts everything and touches nothing

mod noop;
mod postgres;
mod sqlserver;

#[cfg(test)]
pub(crate) mod recording;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_yaml::Value;

use crate::database::ImportDefinition;
use crate::error::{FlowError, Result};

pub use noop::NoOpDriver;
pub use postgres::PostgresDriver;
pub use sqlserver::{expand_import_asserts, SqlServerDriver};

/// Where to connect and as whom.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A scalar value read from a fixture document.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FixtureValue {
    /// Convert a YAML scalar; collections are rejected.
    pub fn from_yaml(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(FixtureValue::Null),
            Value::Bool(b) => Ok(FixtureValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FixtureValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FixtureValue::Float(f))
                } else {
                    Err(FlowError::runtime(format!("Unsupported fixture number {}", n)))
                }
            }
            Value::String(s) => Ok(FixtureValue::Text(s.clone())),
            Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
            Value::Sequence(_) | Value::Mapping(_) => Err(FlowError::runtime(
                "Fixture values must be scalars".to_string(),
            )),
        }
    }
}

/// One fixture row: column names and values in document order.
pub type FixtureRow = Vec<(String, FixtureValue)>;

/// Dialect capability used by the orchestration engine.
///
/// Implementations hold at most one live connection, either to the target
/// database or to the dialect's control database, and open it lazily.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Short dialect name for logging.
    fn name(&self) -> &'static str;

    /// Bind connection settings, closing any previous connection.
    ///
    /// With `control` set, subsequent statements run against the control
    /// database (used to create and drop the target).
    async fn open(&mut self, settings: &ConnectionSettings, control: bool) -> Result<()>;

    /// Release any live connection. Safe to call when nothing is open.
    async fn close(&mut self) -> Result<()>;

    /// Drop the database named by `settings`, if it exists.
    async fn drop_database(&mut self, settings: &ConnectionSettings) -> Result<()>;

    async fn create_database(&mut self, settings: &ConnectionSettings) -> Result<()>;

    async fn create_schema(&mut self, schema: &str) -> Result<()>;

    /// Drop a schema after dropping `tables` in the given order.
    async fn drop_schema(&mut self, schema: &str, tables: &[String]) -> Result<()>;

    /// Run one SQL batch.
    async fn execute(&mut self, sql: &str, control: bool) -> Result<()>;

    async fn pre_fixture_import(&mut self, table: &str) -> Result<()>;

    async fn insert(&mut self, table: &str, row: &FixtureRow) -> Result<()>;

    async fn post_fixture_import(&mut self, table: &str) -> Result<()>;

    async fn update_sequence(&mut self, sequence: &str, value: i64) -> Result<()>;

    async fn pre_table_import(&mut self, import: &ImportDefinition, table: &str) -> Result<()>;

    async fn post_table_import(&mut self, import: &ImportDefinition, table: &str) -> Result<()>;

    async fn post_data_module_import(
        &mut self,
        import: &ImportDefinition,
        module: &str,
    ) -> Result<()>;

    async fn post_database_import(&mut self, import: &ImportDefinition) -> Result<()>;

    /// Quoted column names of `table`, in ordinal order.
    async fn column_names_for_table(&mut self, table: &str) -> Result<Vec<String>>;

    /// Create the migration ledger if it is missing.
    async fn setup_migrations(&mut self) -> Result<()>;

    /// Whether the ledger has no record of `name` in `namespace`.
    async fn should_migrate(&mut self, namespace: &str, name: &str) -> Result<bool>;

    async fn mark_migration_as_run(&mut self, namespace: &str, name: &str) -> Result<()>;

    /// SQL copying every column of `table` from the source to the target database.
    fn standard_import_sql(
        &self,
        table: &str,
        target_database: &str,
        source_database: &str,
        columns: &[String],
    ) -> Result<String>;

    /// SQL carrying a sequence's position from the source to the target database.
    fn standard_sequence_import_sql(
        &self,
        sequence: &str,
        target_database: &str,
        source_database: &str,
    ) -> Result<String>;

    /// Dialect-specific rewriting of import SQL before substitution.
    fn expand_import_sql(&self, sql: &str) -> Result<String> {
        Ok(sql.to_string())
    }
}

/// Supported driver dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    SqlServer,
    Postgres,
    NoOp,
}

impl DriverKind {
    /// Instantiate a fresh, unconnected driver.
    pub fn create(self) -> Box<dyn DatabaseDriver> {
        match self {
            DriverKind::SqlServer => Box::new(SqlServerDriver::new()),
            DriverKind::Postgres => Box::new(PostgresDriver::new()),
            DriverKind::NoOp => Box::new(NoOpDriver::new()),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            DriverKind::Postgres => 5432,
            DriverKind::SqlServer | DriverKind::NoOp => 1433,
        }
    }
}

impl FromStr for DriverKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlserver" => Ok(DriverKind::SqlServer),
            "postgres" => Ok(DriverKind::Postgres),
            "noop" => Ok(DriverKind::NoOp),
            _ => Err(FlowError::config(format!(
                "Unknown database driver '{}'. Expected one of: sqlserver, postgres, noop",
                s
            ))),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::SqlServer => "sqlserver",
            DriverKind::Postgres => "postgres",
            DriverKind::NoOp => "noop",
        };
        f.write_str(name)
    }
}
