//! ModelSync: generates idempotent schema migrations from declarative entity definitions
//!
//! ModelSync compares the declared fields and relationships of an entity against the live
//! structure of its table and produces the smallest set of guarded migration units that
//! brings the table in line. Columns are added or altered but never dropped.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod utils;

use chrono::Utc;
use std::collections::HashSet;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use db::{DatabaseSink, FileSink, MemorySink, MigrationSink};
pub use error::{Error, Result};
pub use model_sync_macros::Entity;
pub use models::registry::DeclarationRegistry;
pub use models::Entity;
pub use schema::{
    Introspector, MemorySchema, MigrationUnit, Notice, Plan, Reconciler, SqlIntrospector,
    UnitFailure,
};

use schema::{ReconcileOptions, TypeNormalizer};

/// Initialize ModelSync with the specified configuration file
pub async fn init(config_path: &str) -> Result<ModelSyncClient> {
    let config = config::load_from_file(config_path)?;
    ModelSyncClient::new(config).await
}

/// Outcome of syncing one entity
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub entity: String,
    pub notices: Vec<Notice>,
    /// Names of units handed to the sink
    pub persisted: Vec<String>,
    /// Units that failed during planning or persistence
    pub failures: Vec<UnitFailure>,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The main client for interacting with ModelSync
pub struct ModelSyncClient {
    config: Config,
    registry: DeclarationRegistry,
    introspector: Box<dyn Introspector>,
    sink: Box<dyn MigrationSink>,
    reconciler: Reconciler,
}

impl ModelSyncClient {
    /// Create a client that introspects the configured database and writes migration files
    pub async fn new(config: Config) -> Result<Self> {
        let connection = DatabaseConnection::connect(&config.database).await?;
        let introspector = SqlIntrospector::new(connection.clone(), config.database.schema.clone());
        let sink = FileSink::from_config(&config.migrations, connection.dialect());

        let mut registry = DeclarationRegistry::new(&config.models);
        registry.scan_and_register()?;

        Ok(Self::with_parts(
            config,
            registry,
            Box::new(introspector),
            Box::new(sink),
        ))
    }

    /// Create a client from explicit collaborators
    pub fn with_parts(
        config: Config,
        registry: DeclarationRegistry,
        introspector: Box<dyn Introspector>,
        sink: Box<dyn MigrationSink>,
    ) -> Self {
        let reconciler = Reconciler::new(
            TypeNormalizer::from_config(&config.type_mapping),
            ReconcileOptions::from_config(&config),
        );

        Self {
            config,
            registry,
            introspector,
            sink,
            reconciler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &DeclarationRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeclarationRegistry {
        &mut self.registry
    }

    /// Plan the units needed for `entity` without persisting anything
    pub async fn plan(&self, entity: &str) -> Result<Plan> {
        let declaration = self.registry.get(entity)?;
        let table = declaration.table_name();

        let snapshot = self.introspector.snapshot(&table).await?;

        let mut existing_junctions = HashSet::new();
        for junction in self.reconciler.junction_candidates(declaration) {
            if self.introspector.table_exists(&junction).await? {
                existing_junctions.insert(junction);
            }
        }

        self.reconciler
            .plan(declaration, &snapshot, &existing_junctions, Utc::now())
    }

    /// Plan `entity` and hand every unit to the sink
    ///
    /// A failing unit does not stop the remaining ones; failures are collected in the
    /// report. Units already persisted are not rolled back.
    pub async fn sync(&self, entity: &str) -> Result<SyncReport> {
        let plan = self.plan(entity).await?;

        let mut report = SyncReport {
            entity: entity.to_string(),
            notices: plan.notices,
            persisted: Vec::new(),
            failures: plan.failures,
            dry_run: self.config.migrations.dry_run,
        };

        if plan.units.is_empty() {
            tracing::info!(entity = %entity, "Database schema is already in sync with declaration");
            return Ok(report);
        }

        for unit in &plan.units {
            if report.dry_run {
                for operation in unit.plain_operations() {
                    tracing::info!(unit = %unit.name, operation = %operation.describe(), "Migration (dry run)");
                }
                continue;
            }

            match self.sink.persist(unit).await {
                Ok(()) => report.persisted.push(unit.name.clone()),
                Err(err) => {
                    tracing::error!(unit = %unit.name, error = %err, "Failed to persist migration");
                    report.failures.push(UnitFailure {
                        unit: unit.name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
