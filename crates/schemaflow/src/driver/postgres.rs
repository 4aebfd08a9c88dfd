//! PostgreSQL driver.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

use super::{ConnectionSettings, DatabaseDriver, FixtureRow, FixtureValue};
use crate::database::ImportDefinition;
use crate::error::{FlowError, Result};

/// Database every control connection attaches to.
const CONTROL_DATABASE: &str = "postgres";

/// Driver for PostgreSQL.
///
/// Fixture values are rendered inline as SQL literals.
#[derive(Default)]
pub struct PostgresDriver {
    settings: Option<ConnectionSettings>,
    target: Option<Pool>,
    control: Option<Pool>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&mut self, control: bool) -> Result<Object> {
        let settings = self.settings.as_ref().ok_or_else(|| {
            FlowError::runtime("Connection requested before driver was opened".to_string())
        })?;
        let slot = if control { &mut self.control } else { &mut self.target };
        if slot.is_none() {
            *slot = Some(open_pool(settings, control).await?);
        }
        match slot {
            Some(pool) => pool
                .get()
                .await
                .map_err(|e| FlowError::pool(e, "getting PostgreSQL connection")),
            None => Err(FlowError::runtime("PostgreSQL pool unavailable".to_string())),
        }
    }

    async fn run(&mut self, sql: &str, control: bool) -> Result<()> {
        debug!("Executing SQL batch ({} bytes)", sql.len());
        let client = self.client(control).await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn count(&mut self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<i64> {
        let client = self.client(false).await?;
        let row = client.query_one(sql, params).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = $1",
                &[&schema],
            )
            .await?;
        Ok(count > 0)
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[&schema, &table],
            )
            .await?;
        Ok(count > 0)
    }
}

async fn open_pool(settings: &ConnectionSettings, control: bool) -> Result<Pool> {
    let database = if control {
        CONTROL_DATABASE
    } else {
        settings.database.as_str()
    };

    let mut pg_config = PgConfig::new();
    pg_config.host(&settings.host);
    pg_config.port(settings.port);
    pg_config.dbname(database);
    pg_config.user(&settings.username);
    pg_config.password(&settings.password);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(1)
        .build()
        .map_err(|e| FlowError::pool(e, "creating PostgreSQL pool"))?;

    let client = pool
        .get()
        .await
        .map_err(|e| FlowError::pool(e, "testing PostgreSQL connection"))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL: {}:{}/{}",
        settings.host, settings.port, database
    );
    Ok(pool)
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn open(&mut self, settings: &ConnectionSettings, control: bool) -> Result<()> {
        self.close().await?;
        self.settings = Some(settings.clone());
        self.client(control).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        for pool in [self.target.take(), self.control.take()].into_iter().flatten() {
            pool.close();
        }
        Ok(())
    }

    async fn drop_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.run(
            &format!("DROP DATABASE IF EXISTS {}", quote_identifier(&settings.database)),
            true,
        )
        .await
    }

    async fn create_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        self.run(
            &format!("CREATE DATABASE {}", quote_identifier(&settings.database)),
            true,
        )
        .await
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        if !self.schema_exists(schema).await? {
            self.run(&format!("CREATE SCHEMA {}", quote_identifier(schema)), false)
                .await?;
        }
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str, _tables: &[String]) -> Result<()> {
        self.run(
            &format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_identifier(schema)),
            false,
        )
        .await
    }

    async fn execute(&mut self, sql: &str, control: bool) -> Result<()> {
        self.run(sql, control).await
    }

    async fn pre_fixture_import(&mut self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: &FixtureRow) -> Result<()> {
        self.run(&insert_sql(table, row), false).await
    }

    async fn post_fixture_import(&mut self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn update_sequence(&mut self, sequence: &str, value: i64) -> Result<()> {
        self.run(&format!("ALTER SEQUENCE {} RESTART WITH {}", sequence, value), false)
            .await
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

    async fn column_names_for_table(&mut self, table: &str) -> Result<Vec<String>> {
        let (schema, name) = parse_table_name(table);
        let client = self.client(false).await?;
        let rows = client
            .query(
                "SELECT column_name FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
                &[&schema, &name],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| quote_identifier(row.get::<_, &str>(0)))
            .collect())
    }

    async fn setup_migrations(&mut self) -> Result<()> {
        if !self.table_exists("public", "tblMigration").await? {
            self.run(
                "CREATE TABLE \"tblMigration\"(\"Namespace\" varchar(50),\"Migration\" varchar(255),\"AppliedAt\" timestamp)",
                false,
            )
            .await?;
        }
        Ok(())
    }

    async fn should_migrate(&mut self, namespace: &str, name: &str) -> Result<bool> {
        self.setup_migrations().await?;
        let count = self
            .count(
                "SELECT COUNT(*) FROM \"tblMigration\" WHERE \"Namespace\" = $1 AND \"Migration\" = $2",
                &[&namespace, &name],
            )
            .await?;
        Ok(count == 0)
    }

    async fn mark_migration_as_run(&mut self, namespace: &str, name: &str) -> Result<()> {
        let client = self.client(false).await?;
        client
            .execute(
                "INSERT INTO \"tblMigration\"(\"Namespace\",\"Migration\",\"AppliedAt\") VALUES ($1, $2, current_timestamp)",
                &[&namespace, &name],
            )
            .await?;
        Ok(())
    }

    fn standard_import_sql(
        &self,
        table: &str,
        target_database: &str,
        source_database: &str,
        columns: &[String],
    ) -> Result<String> {
        if target_database != source_database {
            return Err(FlowError::runtime(
                "PostgreSQL standard import across databases is not supported. Provide explicit import SQL files."
                    .to_string(),
            ));
        }
        let columns = columns.join(", ");
        Ok(format!(
            "INSERT INTO {table}({columns})\n  SELECT {columns} FROM {table}\n"
        ))
    }

    fn standard_sequence_import_sql(
        &self,
        sequence: &str,
        target_database: &str,
        source_database: &str,
    ) -> Result<String> {
        if target_database != source_database {
            return Err(FlowError::runtime(
                "PostgreSQL standard sequence import across databases is not supported. Provide explicit import SQL files."
                    .to_string(),
            ));
        }
        Ok(format!(
            "SELECT setval('{sequence}', COALESCE((SELECT last_value FROM {sequence}), 1), true);"
        ))
    }
}

fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Split `schema.table`, stripping bracket and quote decoration; schema defaults to `public`.
fn parse_table_name(table: &str) -> (String, String) {
    let cleaned: String = table
        .trim()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"'))
        .collect();
    match cleaned.rfind('.') {
        Some(dot) => (cleaned[..dot].to_string(), cleaned[dot + 1..].to_string()),
        None => ("public".to_string(), cleaned),
    }
}

fn literal(value: &FixtureValue) -> String {
    match value {
        FixtureValue::Null => "NULL".to_string(),
        FixtureValue::Bool(true) => "TRUE".to_string(),
        FixtureValue::Bool(false) => "FALSE".to_string(),
        FixtureValue::Int(i) => i.to_string(),
        FixtureValue::Float(f) if f.is_finite() => f.to_string(),
        FixtureValue::Float(f) => format!("'{}'", f),
        FixtureValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn insert_sql(table: &str, row: &FixtureRow) -> String {
    let columns: Vec<String> = row.iter().map(|(column, _)| quote_identifier(column)).collect();
    let values: Vec<String> = row.iter().map(|(_, value)| literal(value)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        values.join(", ")
    )
}
