//! schemaflow CLI - schema and data lifecycle orchestration.

use clap::{Args, Parser, Subcommand};
use schemaflow::{
    package_data, ConnectionSettings, DatabaseModel, DriverKind, Engine, FlowError, ProjectLoader,
};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "schemaflow")]
#[command(about = "Schema and data lifecycle orchestration for SQL Server and PostgreSQL")]
#[command(version)]
struct Cli {
    /// Directory containing schemaflow.yml
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Database key to operate on
    #[arg(long)]
    database: Option<String>,

    /// Database driver: sqlserver, postgres or noop
    #[arg(long, default_value = "sqlserver")]
    driver: String,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Filter property value, may be repeated
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the database version, schema hash and migration support
    Status,

    /// Create the database, its schemas and fixtures
    Create {
        #[command(flatten)]
        target: TargetArgs,

        /// Reuse the existing database instead of recreating it
        #[arg(long)]
        no_create: bool,

        /// Load this dataset before finalizing
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Drop the database
    Drop {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run pending migrations
    Migrate {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Import module data from a source database
    Import {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// Import definition key [default: the configured defaultImport]
        #[arg(long)]
        import: Option<String>,

        /// Restrict the import to a module group
        #[arg(long)]
        module_group: Option<String>,

        /// Resume a partial import at this table
        #[arg(long)]
        resume_at: Option<String>,
    },

    /// Create the database with its data imported from a source database
    CreateByImport {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// Import definition key [default: the configured defaultImport]
        #[arg(long)]
        import: Option<String>,

        /// Resume a partial import at this table
        #[arg(long)]
        resume_at: Option<String>,

        /// Reuse the existing database instead of recreating it
        #[arg(long)]
        no_create: bool,
    },

    /// Replace module data with a dataset
    LoadDataset {
        /// Dataset name
        dataset: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Bring up the modules of a module group
    UpModuleGroup {
        /// Module group key
        group: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Tear down the modules of a module group
    DownModuleGroup {
        /// Module group key
        group: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Package the database's resources as an archive overlay
    PackageData {
        /// Output zip path
        #[arg(long)]
        output: PathBuf,
    },

    /// Dump table contents as fixtures
    DumpFixtures,
}

/// Connection options for the target database.
#[derive(Args)]
struct TargetArgs {
    /// Target server host
    #[arg(long, default_value = "localhost")]
    target_host: String,

    /// Target server port [default: 1433, 5432 for postgres]
    #[arg(long)]
    target_port: Option<u16>,

    /// Target database name
    #[arg(long)]
    target_database: String,

    /// Target login
    #[arg(long, default_value = "sa")]
    target_username: String,

    #[command(flatten)]
    password: TargetPassword,
}

/// Exactly one way of supplying the target password.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct TargetPassword {
    /// Target password
    #[arg(long)]
    password: Option<String>,

    /// Read the target password from this environment variable
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// Read the target password from the first line of stdin
    #[arg(long)]
    password_stdin: bool,
}

/// Connection options for the import source database.
#[derive(Args)]
struct SourceArgs {
    /// Source server host
    #[arg(long, default_value = "localhost")]
    source_host: String,

    /// Source server port [default: 1433, 5432 for postgres]
    #[arg(long)]
    source_port: Option<u16>,

    /// Source database name
    #[arg(long)]
    source_database: String,

    /// Source login
    #[arg(long, default_value = "sa")]
    source_username: String,

    #[command(flatten)]
    password: SourcePassword,
}

/// Exactly one way of supplying the source password.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourcePassword {
    /// Source password
    #[arg(long)]
    source_password: Option<String>,

    /// Read the source password from this environment variable
    #[arg(long, value_name = "VAR")]
    source_password_env: Option<String>,

    /// Read the source password from the first line of stdin
    #[arg(long)]
    source_password_stdin: bool,
}

impl TargetArgs {
    fn settings(&self, kind: DriverKind) -> Result<ConnectionSettings, FlowError> {
        Ok(ConnectionSettings {
            host: self.target_host.clone(),
            port: self.target_port.unwrap_or_else(|| kind.default_port()),
            database: self.target_database.clone(),
            username: self.target_username.clone(),
            password: resolve_password(
                &self.password.password,
                &self.password.password_env,
                self.password.password_stdin,
            )?,
        })
    }
}

impl SourceArgs {
    fn settings(&self, kind: DriverKind) -> Result<ConnectionSettings, FlowError> {
        Ok(ConnectionSettings {
            host: self.source_host.clone(),
            port: self.source_port.unwrap_or_else(|| kind.default_port()),
            database: self.source_database.clone(),
            username: self.source_username.clone(),
            password: resolve_password(
                &self.password.source_password,
                &self.password.source_password_env,
                self.password.source_password_stdin,
            )?,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), FlowError> {
    let Cli {
        project_dir,
        database,
        driver,
        log_format,
        verbosity,
        properties,
        command,
    } = Cli::parse();

    setup_logging(&verbosity, &log_format);

    match command {
        Commands::DumpFixtures => Err(dump_fixtures_unsupported()),
        command => {
            let db = ProjectLoader::new(&project_dir)
                .with_database(database)
                .load()?;
            info!("Loaded project from {:?}", project_dir);

            let properties: BTreeMap<String, String> = properties.into_iter().collect();
            let filters = db.resolve_filters(&properties)?;
            let kind: DriverKind = driver.parse()?;
            let mut engine = Engine::new(kind.create()).with_filters(filters);
            execute(command, &db, kind, &mut engine).await
        }
    }
}

async fn execute(
    command: Commands,
    db: &DatabaseModel,
    kind: DriverKind,
    engine: &mut Engine,
) -> Result<(), FlowError> {
    match command {
        Commands::DumpFixtures => return Err(dump_fixtures_unsupported()),
        Commands::Status => {
            print!("{}", Engine::status(db));
        }
        Commands::Create {
            target,
            no_create,
            dataset,
        } => {
            let target = target.settings(kind)?;
            match dataset {
                Some(dataset) => {
                    engine
                        .create_with_dataset(db, &target, no_create, &dataset)
                        .await?
                }
                None => engine.create(db, &target, no_create).await?,
            }
        }
        Commands::Drop { target } => {
            engine.drop_database(&target.settings(kind)?).await?;
        }
        Commands::Migrate { target } => {
            engine.migrate(db, &target.settings(kind)?).await?;
        }
        Commands::Import {
            target,
            source,
            import,
            module_group,
            resume_at,
        } => {
            let import = import.unwrap_or_else(|| db.default_import.clone());
            engine
                .database_import(
                    db,
                    &import,
                    module_group.as_deref(),
                    &target.settings(kind)?,
                    &source.settings(kind)?,
                    resume_at.as_deref(),
                )
                .await?;
        }
        Commands::CreateByImport {
            target,
            source,
            import,
            resume_at,
            no_create,
        } => {
            let import = import.unwrap_or_else(|| db.default_import.clone());
            engine
                .create_by_import(
                    db,
                    &import,
                    &target.settings(kind)?,
                    &source.settings(kind)?,
                    resume_at.as_deref(),
                    no_create,
                )
                .await?;
        }
        Commands::LoadDataset { dataset, target } => {
            engine
                .load_dataset(db, &dataset, &target.settings(kind)?)
                .await?;
        }
        Commands::UpModuleGroup { group, target } => {
            engine
                .up_module_group(db, &group, &target.settings(kind)?)
                .await?;
        }
        Commands::DownModuleGroup { group, target } => {
            engine
                .down_module_group(db, &group, &target.settings(kind)?)
                .await?;
        }
        Commands::PackageData { output } => {
            package_data(db, &output)?;
        }
    }

    Ok(())
}

fn dump_fixtures_unsupported() -> FlowError {
    FlowError::runtime("dump-fixtures command is not yet implemented.")
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))
}

fn resolve_password(
    literal: &Option<String>,
    env_var: &Option<String>,
    from_stdin: bool,
) -> Result<String, FlowError> {
    if let Some(password) = literal {
        return Ok(password.clone());
    }
    if let Some(var) = env_var {
        return std::env::var(var).map_err(|_| {
            FlowError::config(format!("Password environment variable '{}' is not set", var))
        });
    }
    if from_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| FlowError::io("Failed to read password from stdin", e))?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }
    Err(FlowError::config("No password supplied"))
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
