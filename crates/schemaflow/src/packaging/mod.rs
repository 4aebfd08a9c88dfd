//! Packaging of a database's resources as a reusable archive overlay.

pub mod archive;
pub mod stage;

use std::path::Path;

use tempfile::TempDir;
use tracing::info;

use crate::database::DatabaseModel;
use crate::error::{FlowError, Result};

pub use archive::DeterministicPackager;
pub use stage::DataPackager;

/// Stage `db` in a temporary directory and zip it deterministically to `output`.
pub fn package_data(db: &DatabaseModel, output: &Path) -> Result<()> {
    let staging = TempDir::new().map_err(|e| FlowError::io("Failed to create staging directory", e))?;
    DataPackager::stage(db, staging.path())?;
    DeterministicPackager.write(staging.path(), output)?;
    info!("Packaged database '{}' to {}", db.key, output.display());
    Ok(())
}
