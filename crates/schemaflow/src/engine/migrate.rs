//! Migration ledger handling.

use tracing::{debug, info};

use super::Engine;
use crate::database::DatabaseModel;
use crate::error::Result;

/// How collected migrations are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    /// Run migrations the ledger has not seen.
    Perform,
    /// Mark every migration as run without running it.
    Record,
    /// Run every migration regardless of the ledger.
    Force,
}

/// Index of the migration marking the `Release-<version>` boundary.
///
/// Only the part of the name after its first `_` is compared.
pub fn release_index(version: Option<&str>, names: &[String]) -> Option<usize> {
    let marker = format!("Release-{}", version?);
    names.iter().position(|name| {
        name.split_once('_')
            .map(|(_, rest)| rest == marker)
            .unwrap_or(false)
    })
}

impl Engine {
    /// Apply the database's migrations with the given action.
    pub(super) async fn perform_migration(
        &mut self,
        db: &DatabaseModel,
        action: MigrationAction,
    ) -> Result<()> {
        let files = db.resolver().collect_files(&db.migrations_dir_name, "sql")?;
        let names: Vec<String> = files
            .iter()
            .map(|file| {
                let basename = file.basename();
                basename.strip_suffix(".sql").unwrap_or(basename).to_string()
            })
            .collect();
        let version_index = release_index(db.version.as_deref(), &names);

        for (index, (file, name)) in files.iter().zip(&names).enumerate() {
            if action == MigrationAction::Perform
                && !self.driver.should_migrate(&db.key, name).await?
            {
                debug!("Migration {} already applied", name);
                continue;
            }

            let should_run = action != MigrationAction::Record
                && version_index.map_or(true, |release| release < index);
            if should_run {
                info!("Running migration {}", name);
                let sql = db.resolver().read_text(file)?;
                self.run_sql(&sql).await?;
            } else {
                debug!("Recording migration {} without running it", name);
            }
            self.driver.mark_migration_as_run(&db.key, name).await?;
        }
        Ok(())
    }

    /// Create the ledger and bring it up to date after a fresh create.
    pub(super) async fn setup_migrations(&mut self, db: &DatabaseModel) -> Result<()> {
        if !db.migrations {
            return Ok(());
        }
        self.driver.setup_migrations().await?;
        let action = if db.migrations_applied_at_create {
            MigrationAction::Record
        } else {
            MigrationAction::Force
        };
        self.perform_migration(db, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_release_index() {
        let migrations = names(&["001_Init", "002_Release-2", "003_Next", "004_Release-3"]);
        assert_eq!(release_index(Some("2"), &migrations), Some(1));
        assert_eq!(release_index(Some("3"), &migrations), Some(3));
        assert_eq!(release_index(Some("9"), &migrations), None);
        assert_eq!(release_index(None, &migrations), None);
    }

    #[test]
    fn test_release_marker_needs_prefix() {
        let migrations = names(&["Release-2", "x_y_Release-2"]);
        assert_eq!(release_index(Some("2"), &migrations), None);
    }
}
