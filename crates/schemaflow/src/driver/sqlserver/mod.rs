//! SQL Server driver.

mod connection;
mod import_assert;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tiberius::ToSql;
use tracing::debug;

use self::connection::{open_pool, TiberiusConnectionManager};
use super::{ConnectionSettings, DatabaseDriver, FixtureRow, FixtureValue};
use crate::database::ImportDefinition;
use crate::error::{FlowError, Result};

pub use import_assert::expand_import_asserts;

const MIGRATION_TABLE: &str = "[dbo].[tblMigration]";

static NULL_PARAM: Option<&'static str> = None;

/// Driver for Microsoft SQL Server.
///
/// [`DatabaseDriver::open`] connects to the requested side; the other side
/// (target or control) connects on first use.
#[derive(Default)]
pub struct SqlServerDriver {
    settings: Option<ConnectionSettings>,
    target: Option<Pool<TiberiusConnectionManager>>,
    control: Option<Pool<TiberiusConnectionManager>>,
}

impl SqlServerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(
        &mut self,
        control: bool,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        let settings = self.settings.as_ref().ok_or_else(|| {
            FlowError::runtime("Connection requested before driver was opened".to_string())
        })?;
        let slot = if control { &mut self.control } else { &mut self.target };
        if slot.is_none() {
            *slot = Some(open_pool(settings, control).await?);
        }
        let pool = match slot {
            Some(pool) => pool,
            None => return Err(FlowError::runtime("SQL Server pool unavailable".to_string())),
        };
        pool.get()
            .await
            .map_err(|e| FlowError::pool(e, "getting SQL Server connection"))
    }

    async fn run(&mut self, sql: &str, control: bool) -> Result<()> {
        debug!("Executing SQL batch ({} bytes)", sql.len());
        let mut conn = self.connection(control).await?;
        conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn count(&mut self, sql: &str, params: &[&dyn ToSql], control: bool) -> Result<i64> {
        let mut conn = self.connection(control).await?;
        let row = conn.query(sql, params).await?.into_row().await?;
        Ok(row.and_then(|r| r.get::<i32, _>(0)).map(i64::from).unwrap_or(0))
    }

    async fn database_exists(&mut self, database: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM sys.databases WHERE name = @P1",
                &[&database],
                true,
            )
            .await?;
        Ok(count > 0)
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = @P1",
                &[&schema],
                false,
            )
            .await?;
        Ok(count > 0)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE OBJECT_ID(TABLE_SCHEMA + '.' + TABLE_NAME) = OBJECT_ID(@P1)",
                &[&table],
                false,
            )
            .await?;
        Ok(count > 0)
    }

    async fn has_identity_column(&mut self, table: &str) -> Result<bool> {
        let count = self
            .count(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.COLUMNS WHERE COLUMNPROPERTY(OBJECT_ID(@P1), COLUMN_NAME, 'IsIdentity') = 1",
                &[&table],
                false,
            )
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl DatabaseDriver for SqlServerDriver {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    async fn open(&mut self, settings: &ConnectionSettings, control: bool) -> Result<()> {
        self.close().await?;
        self.settings = Some(settings.clone());
        self.connection(control).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.target = None;
        self.control = None;
        Ok(())
    }

    async fn drop_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        if self.database_exists(&settings.database).await? {
            let database = quote(&settings.database);
            self.run(
                &format!("ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE", database),
                true,
            )
            .await?;
            self.run(&format!("DROP DATABASE {}", database), true).await?;
        }
        Ok(())
    }

    async fn create_database(&mut self, settings: &ConnectionSettings) -> Result<()> {
        if !self.database_exists(&settings.database).await? {
            self.run(&format!("CREATE DATABASE {}", quote(&settings.database)), true)
                .await?;
        }
        Ok(())
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        if !self.schema_exists(schema).await? {
            self.run(&format!("CREATE SCHEMA {}", quote(schema)), false).await?;
        }
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str, tables: &[String]) -> Result<()> {
        for table in tables {
            if self.table_exists(table).await? {
                self.run(&format!("DROP TABLE {}", table), false).await?;
            }
        }
        if self.schema_exists(schema).await? {
            self.run(&format!("DROP SCHEMA {}", quote(schema)), false).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, control: bool) -> Result<()> {
        self.run(sql, control).await
    }

    async fn pre_fixture_import(&mut self, table: &str) -> Result<()> {
        if self.has_identity_column(table).await? {
            self.run(&format!("SET IDENTITY_INSERT {} ON", table), false).await?;
        }
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: &FixtureRow) -> Result<()> {
        let columns: Vec<String> = row.iter().map(|(column, _)| quote(column)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("@P{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<&dyn ToSql> = row.iter().map(|(_, value)| sql_param(value)).collect();

        let mut conn = self.connection(false).await?;
        conn.execute(sql.as_str(), &params).await?;
        Ok(())
    }

    async fn post_fixture_import(&mut self, table: &str) -> Result<()> {
        if self.has_identity_column(table).await? {
            self.run(&format!("SET IDENTITY_INSERT {} OFF", table), false).await?;
        }
        Ok(())
    }

    async fn update_sequence(&mut self, sequence: &str, value: i64) -> Result<()> {
        self.run(&format!("ALTER SEQUENCE {} RESTART WITH {}", sequence, value), false)
            .await
    }

    async fn pre_table_import(&mut self, _import: &ImportDefinition, table: &str) -> Result<()> {
        self.pre_fixture_import(table).await
    }

    async fn post_table_import(&mut self, _import: &ImportDefinition, table: &str) -> Result<()> {
        self.post_fixture_import(table).await
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
        let mut conn = self.connection(false).await?;
        let rows = conn
            .query(
                "SELECT C.name AS column_name FROM sys.syscolumns C WHERE C.id = OBJECT_ID(@P1) ORDER BY C.colid",
                &[&table],
            )
            .await?
            .into_first_result()
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0))
            .map(quote)
            .collect())
    }

    async fn setup_migrations(&mut self) -> Result<()> {
        if !self.table_exists(MIGRATION_TABLE).await? {
            self.run(
                "CREATE TABLE [dbo].[tblMigration]([Namespace] VARCHAR(50),[Migration] VARCHAR(255),[AppliedAt] DATETIME)",
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
                "SELECT COUNT(*) FROM [dbo].[tblMigration] WHERE [Namespace] = @P1 AND [Migration] = @P2",
                &[&namespace, &name],
                false,
            )
            .await?;
        Ok(count == 0)
    }

    async fn mark_migration_as_run(&mut self, namespace: &str, name: &str) -> Result<()> {
        let mut conn = self.connection(false).await?;
        conn.execute(
            "INSERT INTO [dbo].[tblMigration]([Namespace],[Migration],[AppliedAt]) VALUES (@P1, @P2, GETDATE())",
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
        Ok(table_import_sql(table, target_database, source_database, columns))
    }

    fn standard_sequence_import_sql(
        &self,
        sequence: &str,
        target_database: &str,
        source_database: &str,
    ) -> Result<String> {
        Ok(sequence_import_sql(sequence, target_database, source_database))
    }

    fn expand_import_sql(&self, sql: &str) -> Result<String> {
        expand_import_asserts(sql)
    }
}

fn sql_param(value: &FixtureValue) -> &dyn ToSql {
    match value {
        FixtureValue::Null => &NULL_PARAM,
        FixtureValue::Bool(b) => b,
        FixtureValue::Int(i) => i,
        FixtureValue::Float(f) => f,
        FixtureValue::Text(s) => s,
    }
}

/// Bracket-quote an identifier.
fn quote(value: &str) -> String {
    format!("[{}]", value.replace(']', "]]"))
}

pub(crate) fn table_import_sql(
    table: &str,
    target_database: &str,
    source_database: &str,
    columns: &[String],
) -> String {
    let columns = columns.join(", ");
    format!(
        "INSERT INTO [{target}].{table}({columns})\n  SELECT {columns} FROM [{source}].{table}\n",
        target = target_database,
        source = source_database,
    )
}

pub(crate) fn sequence_import_sql(
    sequence: &str,
    target_database: &str,
    source_database: &str,
) -> String {
    format!(
        "DECLARE @Next VARCHAR(50);\n\
         SELECT @Next = CAST(current_value AS BIGINT) + 1 FROM [{source}].sys.sequences \
         WHERE object_id = OBJECT_ID('[{source}].{sequence}');\n\
         SET @Next = COALESCE(@Next,'1');\
         EXEC('USE [{target}]; ALTER SEQUENCE {sequence} RESTART WITH ' + @Next );",
        source = source_database,
        target = target_database,
    )
}
