//! # schemaflow
//!
//! Schema and data lifecycle orchestration for SQL Server and PostgreSQL.
//!
//! A project declares its modules, their tables and sequences, and the
//! directories holding DDL scripts, fixtures, datasets, migrations and import
//! overrides. This library provides:
//!
//! - **Repository catalogues** merged from the project and archive overlays
//! - **Resource resolution** across search roots and zip overlays with index files
//! - **Lifecycle operations**: create, drop, migrate, datasets, module groups
//! - **Cross-database import** with resumable, per-table overrides
//! - **Deterministic packaging** of a database's resources as an overlay zip
//!
//! ## Example
//!
//! ```rust,no_run
//! use schemaflow::{ConnectionSettings, DriverKind, Engine, ProjectLoader};
//!
//! #[tokio::main]
//! async fn main() -> schemaflow::Result<()> {
//!     let db = ProjectLoader::new(".").load()?;
//!     let target = ConnectionSettings {
//!         host: "localhost".to_string(),
//!         port: 1433,
//!         database: "app".to_string(),
//!         username: "sa".to_string(),
//!         password: "secret".to_string(),
//!     };
//!     let mut engine = Engine::new(DriverKind::SqlServer.create());
//!     engine.create(&db, &target, false).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod driver;
pub mod engine;
pub mod error;
pub mod packaging;
pub mod repository;
pub mod resources;

// Re-exports for convenient access
pub use config::ProjectConfig;
pub use database::{DatabaseModel, ImportDefinition, ModuleGroup, ProjectLoader};
pub use driver::{ConnectionSettings, DatabaseDriver, DriverKind};
pub use engine::Engine;
pub use error::{ErrorKind, FlowError, Result};
pub use packaging::{package_data, DataPackager, DeterministicPackager};
pub use repository::{ModuleDefinition, RepositoryModel};
pub use resources::{ArchiveOverlay, ResourceLocation, ResourceResolver};
