//! Orchestration of the schema and data lifecycle.
//!
//! The [`Engine`] owns one [`DatabaseDriver`] and runs each public operation
//! as a strict sequence of driver calls over a single scoped connection.
//! The connection is opened immediately before the work starts and closed on
//! every exit path before the operation returns.

pub mod batch;
pub mod fixtures;
mod import;
pub mod migrate;

use tracing::{debug, info, instrument, warn};

use crate::database::{DatabaseModel, ImportDefinition};
use crate::driver::{ConnectionSettings, DatabaseDriver};
use crate::error::Result;
use import::{ImportEndpoints, ImportOptions};
use migrate::MigrationAction;

pub use batch::split_batches;

/// Which per-module directory set to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleMode {
    Up,
    Down,
    Finalize,
}

/// Runs lifecycle operations against one database driver.
pub struct Engine {
    driver: Box<dyn DatabaseDriver>,
    filters: Vec<(String, String)>,
}

impl Engine {
    pub fn new(driver: Box<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            filters: Vec::new(),
        }
    }

    /// Substitute these resolved `(pattern, value)` pairs into every SQL file run.
    pub fn with_filters(mut self, filters: Vec<(String, String)>) -> Self {
        self.filters = filters;
        self
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Human-readable summary of the database model.
    pub fn status(db: &DatabaseModel) -> String {
        format!(
            "Database Version: {}\nDatabase Schema Hash: {}\nMigration Support: {}\n",
            db.version.as_deref().unwrap_or("None"),
            db.schema_hash.as_deref().unwrap_or("None"),
            if db.migrations { "Yes" } else { "No" }
        )
    }

    /// Create the database, its schemas, module fixtures and migration ledger.
    #[instrument(skip_all, fields(database = %target.database))]
    pub async fn create(
        &mut self,
        db: &DatabaseModel,
        target: &ConnectionSettings,
        no_create: bool,
    ) -> Result<()> {
        info!("Creating database");
        self.recreate_database(target, no_create).await?;
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.create_steps(db, None).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Create the database and load a dataset before finalizing it.
    #[instrument(skip_all, fields(database = %target.database, dataset = %dataset))]
    pub async fn create_with_dataset(
        &mut self,
        db: &DatabaseModel,
        target: &ConnectionSettings,
        no_create: bool,
        dataset: &str,
    ) -> Result<()> {
        db.require_dataset(dataset)?;
        info!("Creating database with dataset");
        self.recreate_database(target, no_create).await?;
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.create_steps(db, Some(dataset)).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Drop the target database through the control connection.
    #[instrument(skip_all, fields(database = %target.database))]
    pub async fn drop_database(&mut self, target: &ConnectionSettings) -> Result<()> {
        info!("Dropping database");
        let result = match self.driver.open(target, true).await {
            Ok(()) => self.driver.drop_database(target).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Run pending migrations.
    #[instrument(skip_all, fields(database = %target.database))]
    pub async fn migrate(&mut self, db: &DatabaseModel, target: &ConnectionSettings) -> Result<()> {
        info!("Migrating database");
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.perform_migration(db, MigrationAction::Perform).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Replace the data of every module with a declared dataset.
    #[instrument(skip_all, fields(database = %target.database, dataset = %dataset))]
    pub async fn load_dataset(
        &mut self,
        db: &DatabaseModel,
        dataset: &str,
        target: &ConnectionSettings,
    ) -> Result<()> {
        db.require_dataset(dataset)?;
        info!("Loading dataset");
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.dataset_steps(db, dataset).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Bring up the modules of a group, each one fully before the next.
    #[instrument(skip_all, fields(database = %target.database, group = %group_key))]
    pub async fn up_module_group(
        &mut self,
        db: &DatabaseModel,
        group_key: &str,
        target: &ConnectionSettings,
    ) -> Result<()> {
        let group = db.module_group(group_key)?;
        info!("Bringing up module group");
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.up_group_steps(db, &group.modules).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Tear down the modules of a group in reverse module order.
    #[instrument(skip_all, fields(database = %target.database, group = %group_key))]
    pub async fn down_module_group(
        &mut self,
        db: &DatabaseModel,
        group_key: &str,
        target: &ConnectionSettings,
    ) -> Result<()> {
        let group = db.module_group(group_key)?;
        info!("Tearing down module group");
        let result = match self.driver.open(target, false).await {
            Ok(()) => self.down_group_steps(db, &group.modules).await,
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Replace module data with data copied from the source database.
    #[instrument(skip_all, fields(database = %target.database, import = %import_key))]
    pub async fn database_import(
        &mut self,
        db: &DatabaseModel,
        import_key: &str,
        module_group: Option<&str>,
        target: &ConnectionSettings,
        source: &ConnectionSettings,
        resume_at: Option<&str>,
    ) -> Result<()> {
        let import = db.import(import_key)?;
        let group = module_group.map(|key| db.module_group(key)).transpose()?;
        let modules: Vec<String> = import
            .modules
            .iter()
            .filter(|module| group.map_or(true, |g| g.modules.contains(*module)))
            .cloned()
            .collect();
        let endpoints = ImportEndpoints {
            source: &source.database,
            target: &target.database,
        };
        let options = ImportOptions {
            delete_existing: true,
            run_hooks: group.is_none(),
            resume_at,
        };

        info!("Importing from {}", source.database);
        let result = match self.driver.open(target, false).await {
            Ok(()) => {
                self.perform_import(db, import, &modules, endpoints, options)
                    .await
            }
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Create the database with its data imported from the source database.
    #[instrument(skip_all, fields(database = %target.database, import = %import_key))]
    pub async fn create_by_import(
        &mut self,
        db: &DatabaseModel,
        import_key: &str,
        target: &ConnectionSettings,
        source: &ConnectionSettings,
        resume_at: Option<&str>,
        no_create: bool,
    ) -> Result<()> {
        let import = db.import(import_key)?;
        if resume_at.is_none() {
            self.recreate_database(target, no_create).await?;
        }
        let endpoints = ImportEndpoints {
            source: &source.database,
            target: &target.database,
        };
        let options = ImportOptions {
            delete_existing: false,
            run_hooks: true,
            resume_at,
        };

        info!("Creating database by import from {}", source.database);
        let result = match self.driver.open(target, false).await {
            Ok(()) => {
                self.create_by_import_steps(db, import, endpoints, options)
                    .await
            }
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    /// Close the connection, then hand back the operation's own result.
    async fn close_after<T>(&mut self, result: Result<T>) -> Result<T> {
        let closed = self.driver.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!("Failed to close connection after error: {}", close_error);
                Err(e)
            }
        }
    }

    async fn recreate_database(&mut self, target: &ConnectionSettings, no_create: bool) -> Result<()> {
        if no_create {
            return Ok(());
        }
        let result = match self.driver.open(target, true).await {
            Ok(()) => {
                match self.driver.drop_database(target).await {
                    Ok(()) => self.driver.create_database(target).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        self.close_after(result).await
    }

    async fn create_steps(&mut self, db: &DatabaseModel, dataset: Option<&str>) -> Result<()> {
        self.run_dirs(db, &db.pre_create_dirs).await?;
        self.process_modules(db, db.modules(), ModuleMode::Up).await?;
        if let Some(dataset) = dataset {
            self.dataset_steps(db, dataset).await?;
        }
        self.finish_create(db).await
    }

    async fn create_by_import_steps(
        &mut self,
        db: &DatabaseModel,
        import: &ImportDefinition,
        endpoints: ImportEndpoints<'_>,
        options: ImportOptions<'_>,
    ) -> Result<()> {
        if options.resume_at.is_none() {
            self.run_dirs(db, &db.pre_create_dirs).await?;
            self.process_modules(db, db.modules(), ModuleMode::Up).await?;
        }
        self.perform_import(db, import, &import.modules, endpoints, options)
            .await?;
        self.finish_create(db).await
    }

    async fn finish_create(&mut self, db: &DatabaseModel) -> Result<()> {
        self.process_modules(db, db.modules(), ModuleMode::Finalize)
            .await?;
        self.run_dirs(db, &db.post_create_dirs).await?;
        self.setup_migrations(db).await
    }

    async fn up_group_steps(&mut self, db: &DatabaseModel, selected: &[String]) -> Result<()> {
        for module in db.modules() {
            if !selected.contains(module) {
                continue;
            }
            self.process_module(db, module, ModuleMode::Up).await?;
            self.process_module(db, module, ModuleMode::Finalize).await?;
        }
        Ok(())
    }

    async fn down_group_steps(&mut self, db: &DatabaseModel, selected: &[String]) -> Result<()> {
        for module in db.modules().iter().rev() {
            if !selected.contains(module) {
                continue;
            }
            self.process_module(db, module, ModuleMode::Down).await?;
        }
        Ok(())
    }

    async fn process_modules(
        &mut self,
        db: &DatabaseModel,
        modules: &[String],
        mode: ModuleMode,
    ) -> Result<()> {
        for module in modules {
            self.process_module(db, module, mode).await?;
        }
        Ok(())
    }

    async fn process_module(&mut self, db: &DatabaseModel, module: &str, mode: ModuleMode) -> Result<()> {
        debug!("Processing module {} ({:?})", module, mode);
        let schema = db.repository.schema_name_for_module(module)?;
        match mode {
            ModuleMode::Up => {
                self.driver.create_schema(schema).await?;
                self.run_module_dirs(db, module, &db.up_dirs).await?;
                self.load_module_fixtures(db.resolver(), &db.repository, module, &db.fixture_dir_name)
                    .await
            }
            ModuleMode::Finalize => self.run_module_dirs(db, module, &db.finalize_dirs).await,
            ModuleMode::Down => {
                self.run_module_dirs(db, module, &db.down_dirs).await?;
                let tables: Vec<String> = db
                    .repository
                    .table_ordering(module)?
                    .iter()
                    .rev()
                    .cloned()
                    .collect();
                self.driver.drop_schema(schema, &tables).await
            }
        }
    }

    async fn dataset_steps(&mut self, db: &DatabaseModel, dataset: &str) -> Result<()> {
        let dataset_dir = db.dataset_dir(dataset);
        for dir in &db.pre_dataset_dirs {
            self.run_dir(db, &format!("{}/{}", dataset_dir, dir)).await?;
        }

        let mut fixture_sets = Vec::with_capacity(db.modules().len());
        for module in db.modules() {
            let elements = db.repository.ordered_elements(module)?;
            let fixtures = db.resolver().collect_fixtures(module, &dataset_dir, &elements)?;
            fixture_sets.push((module, fixtures));
        }
        for (module, fixtures) in fixture_sets.iter().rev() {
            self.unload_fixtures(&db.repository, module, fixtures).await?;
        }
        for (module, fixtures) in &fixture_sets {
            self.load_fixtures(db.resolver(), &db.repository, module, fixtures)
                .await?;
        }

        for dir in &db.post_dataset_dirs {
            self.run_dir(db, &format!("{}/{}", dataset_dir, dir)).await?;
        }
        Ok(())
    }

    async fn run_module_dirs(&mut self, db: &DatabaseModel, module: &str, dirs: &[String]) -> Result<()> {
        for dir in dirs {
            self.run_dir(db, &format!("{}/{}", module, dir)).await?;
        }
        Ok(())
    }

    async fn run_dirs(&mut self, db: &DatabaseModel, dirs: &[String]) -> Result<()> {
        for dir in dirs {
            self.run_dir(db, dir).await?;
        }
        Ok(())
    }

    /// Run every `.sql` file of a logical directory in resolved order.
    async fn run_dir(&mut self, db: &DatabaseModel, dir: &str) -> Result<()> {
        for file in db.resolver().collect_files(dir, "sql")? {
            debug!("Running {}", file);
            let sql = db.resolver().read_text(&file)?;
            self.run_sql(&sql).await?;
        }
        Ok(())
    }

    /// Filter `sql`, split it into batches and execute them in order.
    async fn run_sql(&mut self, sql: &str) -> Result<()> {
        let filtered = batch::apply_filters(sql, &self.filters);
        for statement in split_batches(&filtered) {
            self.driver.execute(&statement, false).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::config::{ImportConfig, ModuleGroupConfig, ProjectConfig};
    use crate::database::tests::sample_repository;
    use crate::driver::recording::RecordingDriver;
    use crate::error::ErrorKind;
    use crate::repository::{ModuleDefinition, RepositoryModel};

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn settings(database: &str) -> ConnectionSettings {
        ConnectionSettings {
            host: "localhost".to_string(),
            port: 1433,
            database: database.to_string(),
            username: "sa".to_string(),
            password: "secret".to_string(),
        }
    }

    fn database(root: &TempDir, config: &ProjectConfig, repository: RepositoryModel) -> DatabaseModel {
        DatabaseModel::from_parts(config, repository, vec![root.path().to_path_buf()], vec![], vec![])
            .unwrap()
    }

    fn import_config() -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.imports.insert(
            "default".to_string(),
            ImportConfig {
                modules: None,
                dir: "import".to_string(),
                pre_import_dirs: vec!["import-hooks/pre".to_string()],
                post_import_dirs: vec!["import-hooks/post".to_string()],
            },
        );
        config
    }

    fn engine(driver: RecordingDriver) -> Engine {
        Engine::new(Box::new(driver))
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_status_text() {
        let root = TempDir::new().unwrap();
        let mut config = ProjectConfig::default();
        let db = database(&root, &config, sample_repository());
        let hash = db.schema_hash.clone().unwrap();
        assert_eq!(
            Engine::status(&db),
            format!(
                "Database Version: None\nDatabase Schema Hash: {}\nMigration Support: No\n",
                hash
            )
        );

        config.version = Some("3".to_string());
        config.migrations = true;
        let db = database(&root, &config, sample_repository());
        assert!(Engine::status(&db).starts_with("Database Version: 3\n"));
        assert!(Engine::status(&db).ends_with("Migration Support: Yes\n"));
    }

    #[tokio::test]
    async fn test_create_call_order() {
        let root = TempDir::new().unwrap();
        write(root.path(), "db-hooks/pre/a.sql", "PRE");
        write(root.path(), "Core/a.sql", "CREATE A\nGO\nCREATE B\n");
        write(root.path(), "Core/fixtures/Core.tblA.yml", "r1:\n  ID: 1\n");
        write(root.path(), "Core/finalize/f.sql", "FIN CORE");
        write(root.path(), "Extra/views/v.sql", "VIEW EXTRA");
        write(root.path(), "db-hooks/post/p.sql", "POST");
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver).create(&db, &settings("app"), false).await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=true",
                "drop_database app",
                "create_database app",
                "close",
                "open app control=false",
                "execute PRE",
                "create_schema Core",
                "execute CREATE A",
                "execute CREATE B",
                "execute DELETE FROM [Core].[tblA]",
                "pre_fixture_import [Core].[tblA]",
                "insert [Core].[tblA] ID=1",
                "post_fixture_import [Core].[tblA]",
                "create_schema ext",
                "execute VIEW EXTRA",
                "execute FIN CORE",
                "execute POST",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_sets_up_migrations_with_release_boundary() {
        let root = TempDir::new().unwrap();
        write(root.path(), "migrations/001_Init.sql", "INIT");
        write(root.path(), "migrations/002_Release-1.sql", "REL");
        write(root.path(), "migrations/003_Next.sql", "NEXT");
        let mut config = ProjectConfig::default();
        config.migrations = true;
        config.migrations_applied_at_create = Some(false);
        config.version = Some("1".to_string());
        let db = database(&root, &config, sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver).create(&db, &settings("app"), true).await.unwrap();

        let log = entries(&log);
        let tail = &log[log.len() - 6..];
        assert_eq!(
            tail,
            [
                "setup_migrations",
                "mark_migration_as_run default 001_Init",
                "mark_migration_as_run default 002_Release-1",
                "execute NEXT",
                "mark_migration_as_run default 003_Next",
                "close",
            ]
        );
        assert_eq!(log[0], "open app control=false");
    }

    #[tokio::test]
    async fn test_create_records_migrations_when_applied_at_create() {
        let root = TempDir::new().unwrap();
        write(root.path(), "migrations/001_Init.sql", "INIT");
        let mut config = ProjectConfig::default();
        config.migrations = true;
        let db = database(&root, &config, sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver).create(&db, &settings("app"), true).await.unwrap();

        let log = entries(&log);
        assert!(log.contains(&"mark_migration_as_run default 001_Init".to_string()));
        assert!(!log.contains(&"execute INIT".to_string()));
    }

    #[tokio::test]
    async fn test_migrate_skips_applied_migrations() {
        let root = TempDir::new().unwrap();
        write(root.path(), "migrations/001_Init.sql", "INIT");
        write(root.path(), "migrations/002_Second.sql", "SECOND");
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (mut driver, log) = RecordingDriver::new();
        driver.applied_migrations.insert("001_Init".to_string());
        engine(driver).migrate(&db, &settings("app")).await.unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute SECOND",
                "mark_migration_as_run default 002_Second",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_uses_control_connection() {
        let (driver, log) = RecordingDriver::new();
        engine(driver).drop_database(&settings("app")).await.unwrap();
        assert_eq!(
            entries(&log),
            vec!["open app control=true", "drop_database app", "close"]
        );
    }

    fn grouped_repository() -> RepositoryModel {
        RepositoryModel::from_modules([
            ModuleDefinition::new("Core").with_tables(["[Core].[tblA]", "[Core].[tblB]"]),
            ModuleDefinition::new("Extra")
                .with_schema("ext")
                .with_tables(["[ext].[tblC]", "[ext].[tblD]"]),
        ])
        .unwrap()
    }

    fn grouped_config(modules: &[&str]) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.module_groups.insert(
            "g".to_string(),
            ModuleGroupConfig {
                modules: modules.iter().map(|m| m.to_string()).collect(),
                import_enabled: false,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_down_module_group_reverses_modules_and_tables() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/down/d.sql", "DOWN CORE");
        write(root.path(), "Extra/down/d.sql", "DOWN EXTRA");
        let db = database(&root, &grouped_config(&["Core", "Extra"]), grouped_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .down_module_group(&db, "g", &settings("app"))
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute DOWN EXTRA",
                "drop_schema ext [[ext].[tblD], [ext].[tblC]]",
                "execute DOWN CORE",
                "drop_schema Core [[Core].[tblB], [Core].[tblA]]",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_up_module_group_only_touches_selected_modules() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/a.sql", "UP CORE");
        write(root.path(), "Extra/a.sql", "UP EXTRA");
        write(root.path(), "Extra/finalize/f.sql", "FIN EXTRA");
        let db = database(&root, &grouped_config(&["Extra"]), grouped_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .up_module_group(&db, "g", &settings("app"))
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "create_schema ext",
                "execute UP EXTRA",
                "execute FIN EXTRA",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_module_group_fails_before_connecting() {
        let root = TempDir::new().unwrap();
        let db = database(&root, &ProjectConfig::default(), grouped_repository());

        let (driver, log) = RecordingDriver::new();
        let err = engine(driver)
            .up_module_group(&db, "missing", &settings("app"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeExecution);
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_missing_dataset_fails_before_connecting() {
        let root = TempDir::new().unwrap();
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        let err = engine(driver)
            .load_dataset(&db, "missing", &settings("app"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Runtime error: Unknown dataset 'missing'");
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_load_dataset_unloads_in_reverse_and_loads_forward() {
        let root = TempDir::new().unwrap();
        write(root.path(), "datasets/demo/pre/p.sql", "DS PRE");
        write(root.path(), "Core/datasets/demo/Core.tblA.yml", "r1:\n  ID: 5\n");
        write(root.path(), "Core/datasets/demo/Core.seqA.yml", "10\n");
        write(
            root.path(),
            "Extra/datasets/demo/ext.tblC.yml",
            "- c1:\n    X: 1\n- c2:\n    X: 2\n",
        );
        write(root.path(), "datasets/demo/post/q.sql", "DS POST");
        let mut config = ProjectConfig::default();
        config.datasets = vec!["demo".to_string()];
        let db = database(&root, &config, sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .load_dataset(&db, "demo", &settings("app"))
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute DS PRE",
                "execute DELETE FROM [ext].[tblC]",
                "execute DELETE FROM [Core].[tblA]",
                "update_sequence [Core].[seqA] 1",
                "pre_fixture_import [Core].[tblA]",
                "insert [Core].[tblA] ID=5",
                "post_fixture_import [Core].[tblA]",
                "update_sequence [Core].[seqA] 10",
                "pre_fixture_import [ext].[tblC]",
                "insert [ext].[tblC] X=1",
                "post_fixture_import [ext].[tblC]",
                "pre_fixture_import [ext].[tblC]",
                "insert [ext].[tblC] X=2",
                "post_fixture_import [ext].[tblC]",
                "execute DS POST",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_with_dataset_loads_before_finalize() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/datasets/demo/Core.tblB.yml", "r:\n  ID: 2\n");
        write(root.path(), "Core/finalize/f.sql", "FIN");
        let mut config = ProjectConfig::default();
        config.datasets = vec!["demo".to_string()];
        let db = database(&root, &config, sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .create_with_dataset(&db, &settings("app"), true, "demo")
            .await
            .unwrap();

        let log = entries(&log);
        let insert = log.iter().position(|e| e == "insert [Core].[tblB] ID=2").unwrap();
        let finalize = log.iter().position(|e| e == "execute FIN").unwrap();
        let schema = log.iter().position(|e| e == "create_schema ext").unwrap();
        assert!(schema < insert);
        assert!(insert < finalize);
    }

    #[tokio::test]
    async fn test_failure_still_closes_connection() {
        let root = TempDir::new().unwrap();
        write(root.path(), "db-hooks/pre/a.sql", "BOOM");
        write(root.path(), "db-hooks/post/b.sql", "NEVER");
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (mut driver, log) = RecordingDriver::new();
        driver.fail_on_execute = Some("BOOM".to_string());
        let err = engine(driver)
            .create(&db, &settings("app"), true)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuntimeExecution);
        assert_eq!(
            entries(&log),
            vec!["open app control=false", "execute failed BOOM", "close"]
        );
    }

    #[tokio::test]
    async fn test_filters_are_substituted() {
        let root = TempDir::new().unwrap();
        write(root.path(), "db-hooks/pre/a.sql", "SELECT '@@ENV@@'");
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .with_filters(vec![("@@ENV@@".to_string(), "prod".to_string())])
            .create(&db, &settings("app"), true)
            .await
            .unwrap();

        assert!(entries(&log).contains(&"execute SELECT 'prod'".to_string()));
    }

    #[tokio::test]
    async fn test_import_full_run() {
        let root = TempDir::new().unwrap();
        write(root.path(), "import-hooks/pre/h.sql", "PRE __SOURCE__");
        write(
            root.path(),
            "Core/import/Core.tblA.sql",
            "INSERT INTO [__TARGET__].__TABLE__ SELECT * FROM [__SOURCE__].__TABLE__",
        );
        write(root.path(), "Core/fixtures/Core.tblB.yml", "r:\n  ID: 1\n");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute PRE legacy",
                "execute DELETE FROM [Core].[tblB]",
                "execute DELETE FROM [Core].[tblA]",
                "execute DELETE FROM [ext].[tblC]",
                "pre_table_import default [Core].[tblA]",
                "execute INSERT INTO [app].[Core].[tblA] SELECT * FROM [legacy].[Core].[tblA]",
                "post_table_import default [Core].[tblA]",
                "execute IMPORT SEQUENCE [Core].[seqA] app<-legacy",
                "post_data_module_import default Core",
                "pre_table_import default [ext].[tblC]",
                "execute IMPORT [ext].[tblC] app<-legacy ()",
                "post_table_import default [ext].[tblC]",
                "post_data_module_import default Extra",
                "post_database_import default",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_import_resume_skips_until_marker() {
        let root = TempDir::new().unwrap();
        write(root.path(), "import-hooks/pre/h.sql", "PRE");
        let db = database(&root, &import_config(), sample_repository());

        let (mut driver, log) = RecordingDriver::new();
        driver.columns = vec!["[ID]".to_string()];
        engine(driver)
            .database_import(
                &db,
                "default",
                None,
                &settings("app"),
                &settings("legacy"),
                Some("Core.tblB"),
            )
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute DELETE FROM [Core].[tblB]",
                "pre_table_import default [Core].[tblB]",
                "execute IMPORT [Core].[tblB] app<-legacy ([ID])",
                "post_table_import default [Core].[tblB]",
                "execute IMPORT SEQUENCE [Core].[seqA] app<-legacy",
                "post_data_module_import default Core",
                "pre_table_import default [ext].[tblC]",
                "execute IMPORT [ext].[tblC] app<-legacy ([ID])",
                "post_table_import default [ext].[tblC]",
                "post_data_module_import default Extra",
                "post_database_import default",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_import_bad_resume_marker() {
        let root = TempDir::new().unwrap();
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        let err = engine(driver)
            .database_import(
                &db,
                "default",
                None,
                &settings("app"),
                &settings("legacy"),
                Some("Core.nope"),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Runtime error: Partial import unable to be completed as bad table name supplied Core.nope"
        );
        assert_eq!(entries(&log), vec!["open app control=false", "close"]);
    }

    #[tokio::test]
    async fn test_import_rejects_stray_files() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/import/Junk.sql", "SELECT 1");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, _log) = RecordingDriver::new();
        let err = engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::FileCollection);
        assert!(err
            .to_string()
            .contains("Discovered additional files in import directory in database search path."));
    }

    #[tokio::test]
    async fn test_import_with_both_fixture_and_sql_fails() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/import/Core.tblA.sql", "SELECT 1");
        write(root.path(), "Core/import/Core.tblA.yml", "");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, _log) = RecordingDriver::new();
        let err = engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unexpectedly found both import fixture"));
    }

    #[tokio::test]
    async fn test_import_sequence_sql_substitutes_sequence_name() {
        let root = TempDir::new().unwrap();
        write(
            root.path(),
            "Core/import/Core.seqA.sql",
            "SELECT '__TABLE__' FROM [__SOURCE__].x",
        );
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap();

        let log = entries(&log);
        let seq = log
            .iter()
            .position(|e| e == "execute SELECT '[Core].[seqA]' FROM [legacy].x")
            .unwrap();
        assert_eq!(log[seq + 1], "post_data_module_import default Core");
        assert!(!log.iter().any(|e| e.contains("IMPORT SEQUENCE [Core].[seqA]")));
    }

    #[tokio::test]
    async fn test_import_sequence_fixture_sets_value() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/import/Core.seqA.yml", "'42'\n");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap();

        let log = entries(&log);
        let seq = log
            .iter()
            .position(|e| e == "update_sequence [Core].[seqA] 42")
            .unwrap();
        assert_eq!(log[seq + 1], "post_data_module_import default Core");
        assert!(!log.iter().any(|e| e.contains("IMPORT SEQUENCE")));
    }

    #[tokio::test]
    async fn test_import_sequence_with_both_files_fails() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/import/Core.seqA.sql", "SELECT 1");
        write(root.path(), "Core/import/Core.seqA.yml", "1\n");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, _log) = RecordingDriver::new();
        let err = engine(driver)
            .database_import(&db, "default", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("files for Core.seqA."));
    }

    #[tokio::test]
    async fn test_import_with_group_skips_hooks_and_other_modules() {
        let root = TempDir::new().unwrap();
        write(root.path(), "import-hooks/pre/h.sql", "PRE");
        write(root.path(), "import-hooks/post/h.sql", "POST");
        let mut config = import_config();
        config.module_groups.insert(
            "extra".to_string(),
            ModuleGroupConfig {
                modules: vec!["Extra".to_string()],
                import_enabled: true,
            },
        );
        let db = database(&root, &config, sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .database_import(
                &db,
                "default",
                Some("extra"),
                &settings("app"),
                &settings("legacy"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            entries(&log),
            vec![
                "open app control=false",
                "execute DELETE FROM [ext].[tblC]",
                "pre_table_import default [ext].[tblC]",
                "execute IMPORT [ext].[tblC] app<-legacy ()",
                "post_table_import default [ext].[tblC]",
                "post_data_module_import default Extra",
                "post_database_import default",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_import_fails_before_connecting() {
        let root = TempDir::new().unwrap();
        let db = database(&root, &ProjectConfig::default(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        let err = engine(driver)
            .database_import(&db, "nope", None, &settings("app"), &settings("legacy"), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Runtime error: Unable to locate import definition by key 'nope'"
        );
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_create_by_import_skips_delete_phase() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Core/finalize/f.sql", "FIN");
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .create_by_import(&db, "default", &settings("app"), &settings("legacy"), None, false)
            .await
            .unwrap();

        let log = entries(&log);
        assert_eq!(&log[..4], ["open app control=true", "drop_database app", "create_database app", "close"]);
        assert!(!log.iter().any(|e| e.starts_with("execute DELETE")));
        let schema = log.iter().position(|e| e == "create_schema Core").unwrap();
        let import = log
            .iter()
            .position(|e| e == "pre_table_import default [Core].[tblA]")
            .unwrap();
        let finalize = log.iter().position(|e| e == "execute FIN").unwrap();
        assert!(schema < import);
        assert!(import < finalize);
        assert_eq!(log.last().unwrap(), "close");
    }

    #[tokio::test]
    async fn test_create_by_import_resume_skips_create() {
        let root = TempDir::new().unwrap();
        let db = database(&root, &import_config(), sample_repository());

        let (driver, log) = RecordingDriver::new();
        engine(driver)
            .create_by_import(
                &db,
                "default",
                &settings("app"),
                &settings("legacy"),
                Some("ext.tblC"),
                false,
            )
            .await
            .unwrap();

        let log = entries(&log);
        assert_eq!(log[0], "open app control=false");
        assert!(!log.iter().any(|e| e.starts_with("create_schema")));
        assert!(log.contains(&"execute DELETE FROM [ext].[tblC]".to_string()));
    }
}
