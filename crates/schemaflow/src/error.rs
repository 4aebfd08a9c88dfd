//! Error types for the orchestration library.

use std::path::Path;
use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for file collection errors.
pub const EXIT_FILE_COLLECTION_ERROR: u8 = 3;
/// Exit code for runtime execution errors.
pub const EXIT_RUNTIME_ERROR: u8 = 4;
/// Exit code for errors reported by a database driver.
pub const EXIT_DRIVER_ERROR: u8 = 5;
/// Exit code for IO errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Coarse classification of every [`FlowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    FileCollection,
    RuntimeExecution,
    Io,
}

/// Main error type for orchestration operations.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Configuration error (invalid YAML, unknown keys, unresolved references, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource collection error (missing index entries, duplicate basenames, stray files)
    #[error("File collection error: {0}")]
    FileCollection(String),

    /// Runtime execution error (unknown dataset/import/group, bad fixture data, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error with the path or action that failed
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error without additional context
    #[error("IO error: {0}")]
    BareIo(#[from] std::io::Error),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Zip archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl FlowError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        FlowError::Config(message.into())
    }

    /// Create a FileCollection error.
    pub fn file_collection(message: impl Into<String>) -> Self {
        FlowError::FileCollection(message.into())
    }

    /// Create a Runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        FlowError::Runtime(message.into())
    }

    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        FlowError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Wrap an IO error with a description of the action that failed.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FlowError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an IO error raised while touching `path`.
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("{} {}", action, path.display()), source)
    }

    /// Classify this error into the four-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Config(_) | FlowError::Yaml(_) => ErrorKind::Configuration,
            FlowError::FileCollection(_) => ErrorKind::FileCollection,
            FlowError::Runtime(_)
            | FlowError::SqlServer(_)
            | FlowError::Postgres(_)
            | FlowError::Pool { .. } => ErrorKind::RuntimeExecution,
            FlowError::Io { .. } | FlowError::BareIo(_) | FlowError::Zip(_) => ErrorKind::Io,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            FlowError::SqlServer(_) | FlowError::Postgres(_) | FlowError::Pool { .. } => {
                EXIT_DRIVER_ERROR
            }
            _ => match self.kind() {
                ErrorKind::Configuration => EXIT_CONFIG_ERROR,
                ErrorKind::FileCollection => EXIT_FILE_COLLECTION_ERROR,
                ErrorKind::RuntimeExecution => EXIT_RUNTIME_ERROR,
                ErrorKind::Io => EXIT_IO_ERROR,
            },
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, FlowError>;
