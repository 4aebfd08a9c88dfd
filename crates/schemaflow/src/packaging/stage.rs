//! Staging of a database's resolved resources into an overlay-shaped tree.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::database::DatabaseModel;
use crate::error::{FlowError, Result};
use crate::repository::loader::to_yaml;
use crate::resources::overlay::CONTENT_PREFIX;
use crate::resources::resolver::normalize_relative_dir;
use crate::resources::ResourceLocation;

/// Copies everything a database resolves to under `<package_dir>/data/`.
pub struct DataPackager<'a> {
    db: &'a DatabaseModel,
    data_dir: PathBuf,
}

impl<'a> DataPackager<'a> {
    /// Stage `db` into `package_dir`.
    pub fn stage(db: &'a DatabaseModel, package_dir: &Path) -> Result<()> {
        let packager = Self {
            db,
            data_dir: package_dir.join(CONTENT_PREFIX.trim_end_matches('/')),
        };
        packager.stage_modules()?;
        packager.stage_database_dirs()?;
        packager.write_file("repository.yml", &to_yaml(&db.repository)?)?;
        if db.migrations {
            packager.stage_script_dir(&db.migrations_dir_name)?;
        }
        Ok(())
    }

    fn stage_modules(&self) -> Result<()> {
        let db = self.db;
        let import_dirs: BTreeSet<&str> = db.imports.values().map(|i| i.dir.as_str()).collect();

        for module in db.modules() {
            let script_dirs = db.up_dirs.iter().chain(&db.down_dirs).chain(&db.finalize_dirs);
            for dir in script_dirs {
                self.stage_script_dir(&format!("{}/{}", module, dir))?;
            }

            self.stage_fixture_dir(module, &db.fixture_dir_name)?;
            for dir in &import_dirs {
                self.stage_import_dir(module, dir)?;
            }
            for dataset in &db.datasets {
                self.stage_fixture_dir(module, &db.dataset_dir(dataset))?;
            }
        }
        Ok(())
    }

    fn stage_database_dirs(&self) -> Result<()> {
        let db = self.db;
        for dir in db.pre_create_dirs.iter().chain(&db.post_create_dirs) {
            self.stage_script_dir(dir)?;
        }
        for import in db.imports.values() {
            for dir in import.pre_import_dirs.iter().chain(&import.post_import_dirs) {
                self.stage_script_dir(dir)?;
            }
        }
        for dataset in &db.datasets {
            let dataset_dir = db.dataset_dir(dataset);
            for dir in db.pre_dataset_dirs.iter().chain(&db.post_dataset_dirs) {
                self.stage_script_dir(&format!("{}/{}", dataset_dir, dir))?;
            }
        }
        Ok(())
    }

    /// Copy a directory's `.sql` files and write an index listing them in resolved order.
    fn stage_script_dir(&self, dir: &str) -> Result<()> {
        let files = self.db.resolver().collect_files(dir, "sql")?;
        if files.is_empty() {
            return Ok(());
        }
        let logical_dir = normalize_relative_dir(dir);
        let mut index = Vec::with_capacity(files.len());
        for file in &files {
            self.copy(file, &logical_dir)?;
            index.push(file.basename().to_string());
        }
        let index_path = join(&logical_dir, &self.db.index_file_name);
        self.write_file(&index_path, &index.join("\n"))
    }

    fn stage_fixture_dir(&self, module: &str, subdir: &str) -> Result<()> {
        let elements = self.db.repository.ordered_elements(module)?;
        let fixtures = self.db.resolver().collect_fixtures(module, subdir, &elements)?;
        let logical_dir = normalize_relative_dir(&format!("{}/{}", module, subdir));
        for (_, location) in fixtures.iter() {
            self.copy(location, &logical_dir)?;
        }
        Ok(())
    }

    fn stage_import_dir(&self, module: &str, subdir: &str) -> Result<()> {
        let logical_dir = normalize_relative_dir(&format!("{}/{}", module, subdir));
        for element in self.db.repository.ordered_elements(module)? {
            for extension in ["yml", "sql"] {
                if let Some(location) =
                    self.db
                        .resolver()
                        .find_file_in_module(module, subdir, &element, extension)
                {
                    self.copy(&location, &logical_dir)?;
                }
            }
        }
        Ok(())
    }

    fn copy(&self, location: &ResourceLocation, logical_dir: &str) -> Result<()> {
        debug!("Staging {}", location);
        let content = self.db.resolver().read_text(location)?;
        self.write_file(&join(logical_dir, location.basename()), &content)
    }

    fn write_file(&self, logical_path: &str, content: &str) -> Result<()> {
        let path = self.data_dir.join(logical_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FlowError::io_at("Failed to create directory", parent, e))?;
        }
        fs::write(&path, content).map_err(|e| FlowError::io_at("Failed to write", &path, e))
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
