use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use model_sync::config::{self, Config};
use model_sync::schema::{Dialect, TypeNormalizer};
use model_sync::utils::logging;
use model_sync::{
    DatabaseConnection, DatabaseSink, DeclarationRegistry, FileSink, Introspector, MemorySchema,
    MigrationSink, ModelSyncClient, SqlIntrospector, SyncReport,
};

/// Generate idempotent migrations from entity declarations
#[derive(Debug, Parser)]
#[command(name = "model_sync", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, default_value = "model_sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile one entity against its table and emit migrations
    Generate {
        /// Entity name or table name
        entity: String,
        /// Introspect a JSON snapshot file instead of the database
        #[arg(long, conflicts_with = "apply")]
        snapshot: Option<PathBuf>,
        /// Log planned operations without persisting anything
        #[arg(long)]
        dry_run: bool,
        /// Apply units to the database instead of writing files
        #[arg(long)]
        apply: bool,
    },
    /// List registered entity declarations
    List,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("model_sync error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.display().to_string();
    let mut config = config::load_from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    init_tracing(&config)?;

    let mut registry = DeclarationRegistry::new(&config.models);
    registry
        .scan_and_register()
        .context("scanning entity declarations")?;

    match cli.command {
        Commands::List => {
            for declaration in registry.declarations() {
                println!("{} -> {}", declaration.name, declaration.table_name());
            }
            Ok(())
        }
        Commands::Generate {
            entity,
            snapshot,
            dry_run,
            apply,
        } => {
            config.migrations.dry_run |= dry_run;
            let client = build_client(config, registry, snapshot, apply).await?;
            let report = client.sync(&entity).await?;
            print_report(&report);

            if !report.is_success() {
                anyhow::bail!("{} migration unit(s) failed", report.failures.len());
            }
            Ok(())
        }
    }
}

async fn build_client(
    config: Config,
    registry: DeclarationRegistry,
    snapshot: Option<PathBuf>,
    apply: bool,
) -> anyhow::Result<ModelSyncClient> {
    if let Some(path) = snapshot {
        let dialect = Dialect::from_driver(&config.database.driver)?;
        let schema = MemorySchema::from_json_file(&path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let sink = FileSink::from_config(&config.migrations, dialect);

        return Ok(ModelSyncClient::with_parts(
            config,
            registry,
            Box::new(schema),
            Box::new(sink),
        ));
    }

    let connection = DatabaseConnection::connect(&config.database)
        .await
        .context("connecting to the database")?;
    let introspector: Box<dyn Introspector> = Box::new(SqlIntrospector::new(
        connection.clone(),
        config.database.schema.clone(),
    ));

    let sink: Box<dyn MigrationSink> = if apply {
        Box::new(DatabaseSink::new(
            connection,
            config.database.schema.clone(),
            TypeNormalizer::from_config(&config.type_mapping),
            config.migrations.transaction_per_migration,
        ))
    } else {
        Box::new(FileSink::from_config(
            &config.migrations,
            connection.dialect(),
        ))
    };

    Ok(ModelSyncClient::with_parts(config, registry, introspector, sink))
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    if logging::init_logging(&config.logging)? {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

fn print_report(report: &SyncReport) {
    for notice in &report.notices {
        println!("{notice}");
    }
    for unit in &report.persisted {
        println!("persisted {unit}");
    }
    for failure in &report.failures {
        eprintln!("failed {}: {}", failure.unit, failure.message);
    }
    if report.dry_run {
        println!("dry run: nothing was persisted");
    }
}
