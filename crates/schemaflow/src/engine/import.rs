//! Cross-database import of module data.

use std::fs;

use tracing::{debug, info};

use super::batch::import_substitute;
use super::Engine;
use crate::database::{DatabaseModel, ImportDefinition};
use crate::error::{FlowError, Result};
use crate::resources::clean_object_name;

/// Database names an import copies between.
#[derive(Debug, Clone, Copy)]
pub(super) struct ImportEndpoints<'a> {
    pub source: &'a str,
    pub target: &'a str,
}

/// Phases of an import that callers switch on or off.
#[derive(Debug, Clone, Copy)]
pub(super) struct ImportOptions<'a> {
    /// Empty the selected tables before importing.
    pub delete_existing: bool,
    /// Run the import's pre and post hook directories.
    pub run_hooks: bool,
    pub resume_at: Option<&'a str>,
}

/// Tracks the `--resume-at` marker while walking import elements.
#[derive(Debug, Default)]
struct ResumeMarker(Option<String>);

impl ResumeMarker {
    fn is_active(&self) -> bool {
        self.0.is_some()
    }

    /// Clear the marker if it names `element`; true when it did.
    fn reached(&mut self, element: &str) -> bool {
        if self.0.as_deref() == Some(clean_object_name(element).as_str()) {
            self.0 = None;
            true
        } else {
            false
        }
    }
}

impl Engine {
    /// Import every selected module of `import` from the source database.
    pub(super) async fn perform_import(
        &mut self,
        db: &DatabaseModel,
        import: &ImportDefinition,
        modules: &[String],
        endpoints: ImportEndpoints<'_>,
        options: ImportOptions<'_>,
    ) -> Result<()> {
        let mut resume = ResumeMarker(options.resume_at.map(str::to_string));

        if options.run_hooks && !resume.is_active() {
            for dir in &import.pre_import_dirs {
                self.run_import_dir(db, dir, endpoints).await?;
            }
        }

        for module in modules {
            verify_no_unexpected_import_files(db, module, &import.dir)?;
        }

        if options.delete_existing && !resume.is_active() {
            for module in modules {
                for table in db.repository.table_ordering(module)?.iter().rev() {
                    self.driver
                        .execute(&format!("DELETE FROM {}", table), false)
                        .await?;
                }
            }
        }

        for module in modules {
            self.import_module(db, import, module, endpoints, &mut resume)
                .await?;
        }

        if let Some(marker) = resume.0 {
            return Err(FlowError::runtime(format!(
                "Partial import unable to be completed as bad table name supplied {}",
                marker
            )));
        }

        if options.run_hooks {
            for dir in &import.post_import_dirs {
                self.run_import_dir(db, dir, endpoints).await?;
            }
        }
        self.driver.post_database_import(import).await
    }

    async fn import_module(
        &mut self,
        db: &DatabaseModel,
        import: &ImportDefinition,
        module: &str,
        endpoints: ImportEndpoints<'_>,
        resume: &mut ResumeMarker,
    ) -> Result<()> {
        info!("Importing module {}", module);
        for table in db.repository.table_ordering(module)? {
            let has_fixture = db
                .resolver()
                .find_file_in_module(module, &db.fixture_dir_name, table, "yml")
                .is_some();
            if has_fixture {
                debug!("Skipping import of {} as it has a fixture", table);
                continue;
            }

            if resume.reached(table) {
                self.driver
                    .execute(&format!("DELETE FROM {}", table), false)
                    .await?;
            }
            if !resume.is_active() {
                self.driver.pre_table_import(import, table).await?;
                self.import_table(db, import, module, table, endpoints)
                    .await?;
                self.driver.post_table_import(import, table).await?;
            }
        }

        for sequence in db.repository.sequence_ordering(module)? {
            resume.reached(sequence);
            if !resume.is_active() {
                self.import_sequence(db, import, module, sequence, endpoints)
                    .await?;
            }
        }

        if !resume.is_active() {
            self.driver.post_data_module_import(import, module).await?;
        }
        Ok(())
    }

    async fn import_table(
        &mut self,
        db: &DatabaseModel,
        import: &ImportDefinition,
        module: &str,
        table: &str,
        endpoints: ImportEndpoints<'_>,
    ) -> Result<()> {
        let resolver = db.resolver();
        let fixture = resolver.find_file_in_module(module, &import.dir, table, "yml");
        let sql = resolver.find_file_in_module(module, &import.dir, table, "sql");

        match (fixture, sql) {
            (Some(fixture), Some(sql)) => Err(FlowError::runtime(format!(
                "Unexpectedly found both import fixture ({}) and import sql ({}) files.",
                fixture, sql
            ))),
            (Some(fixture), None) => {
                debug!("Importing {} from fixture {}", table, fixture);
                let content = resolver.read_text(&fixture)?;
                self.load_fixture(table, &content).await
            }
            (None, Some(sql)) => {
                debug!("Importing {} with {}", table, sql);
                let content = resolver.read_text(&sql)?;
                self.run_import_sql(Some(table), &content, endpoints).await
            }
            (None, None) => {
                let columns = self.driver.column_names_for_table(table).await?;
                let content = self.driver.standard_import_sql(
                    table,
                    endpoints.target,
                    endpoints.source,
                    &columns,
                )?;
                self.run_import_sql(Some(table), &content, endpoints).await
            }
        }
    }

    async fn import_sequence(
        &mut self,
        db: &DatabaseModel,
        import: &ImportDefinition,
        module: &str,
        sequence: &str,
        endpoints: ImportEndpoints<'_>,
    ) -> Result<()> {
        let resolver = db.resolver();
        let fixture = resolver.find_file_in_module(module, &import.dir, sequence, "yml");
        let sql = resolver.find_file_in_module(module, &import.dir, sequence, "sql");

        match (fixture, sql) {
            (Some(fixture), Some(sql)) => Err(FlowError::runtime(format!(
                "Unexpectedly found both fixture ({}) and sql ({}) files for {}.",
                fixture,
                sql,
                clean_object_name(sequence)
            ))),
            (Some(fixture), None) => {
                let content = resolver.read_text(&fixture)?;
                if let Some(value) = super::fixtures::parse_sequence_fixture(sequence, &content)? {
                    self.driver.update_sequence(sequence, value).await?;
                }
                Ok(())
            }
            (None, Some(sql)) => {
                let content = resolver.read_text(&sql)?;
                self.run_import_sql(Some(sequence), &content, endpoints).await
            }
            (None, None) => {
                let content = self.driver.standard_sequence_import_sql(
                    sequence,
                    endpoints.target,
                    endpoints.source,
                )?;
                self.run_import_sql(Some(sequence), &content, endpoints).await
            }
        }
    }

    async fn run_import_dir(
        &mut self,
        db: &DatabaseModel,
        dir: &str,
        endpoints: ImportEndpoints<'_>,
    ) -> Result<()> {
        for file in db.resolver().collect_files(dir, "sql")? {
            debug!("Running import hook {}", file);
            let content = db.resolver().read_text(&file)?;
            self.run_import_sql(None, &content, endpoints).await?;
        }
        Ok(())
    }

    /// Expand, substitute and run import SQL on the target connection.
    pub(super) async fn run_import_sql(
        &mut self,
        table: Option<&str>,
        sql: &str,
        endpoints: ImportEndpoints<'_>,
    ) -> Result<()> {
        let expanded = self.driver.expand_import_sql(sql)?;
        let substituted = import_substitute(&expanded, table, endpoints.source, endpoints.target);
        self.run_sql(&substituted).await
    }
}

/// Reject `.yml`/`.sql` files in a module's import directories that match no element.
fn verify_no_unexpected_import_files(
    db: &DatabaseModel,
    module: &str,
    import_dir: &str,
) -> Result<()> {
    let elements = db.repository.ordered_elements(module)?;
    let expected: Vec<String> = elements
        .iter()
        .flat_map(|element| {
            let clean = clean_object_name(element);
            [format!("{}.yml", clean), format!("{}.sql", clean)]
        })
        .collect();

    let mut unexpected = Vec::new();
    for root in &db.search_dirs {
        let directory = root.join(module).join(import_dir);
        if !directory.is_dir() {
            continue;
        }
        let entries = fs::read_dir(&directory)
            .map_err(|e| FlowError::io_at("Failed to list", &directory, e))?;
        for entry in entries {
            let path = entry
                .map_err(|e| FlowError::io_at("Failed to list", &directory, e))?
                .path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let candidate = name.ends_with(".yml") || name.ends_with(".sql");
            if candidate && path.is_file() && !expected.iter().any(|e| e == name) {
                unexpected.push(path.display().to_string());
            }
        }
    }

    if unexpected.is_empty() {
        Ok(())
    } else {
        unexpected.sort();
        Err(FlowError::file_collection(format!(
            "Discovered additional files in import directory in database search path. Files: {:?}",
            unexpected
        )))
    }
}
