//! SQL execution
//!
//! This module applies migration units directly to the database.

use async_trait::async_trait;

use crate::db::connection::DatabaseConnection;
use crate::db::migrations::MigrationSink;
use crate::error::{Error, Result};
use crate::schema::analyzer::{Introspector, SqlIntrospector};
use crate::schema::generator::MigrationRenderer;
use crate::schema::normalize::TypeNormalizer;
use crate::schema::operations::MigrationUnit;

/// SQL executor for running statements
pub struct SqlExecutor {
    connection: DatabaseConnection,
}

impl SqlExecutor {
    /// Create a new SQL executor
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Execute multiple SQL statements in order
    pub async fn execute_batch(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            tracing::trace!(sql = %statement, "Executing statement");
            self.connection.execute(statement).await?;
        }

        Ok(())
    }

    /// Execute multiple SQL statements in a transaction
    pub async fn execute_in_transaction(&self, statements: &[String]) -> Result<()> {
        self.connection.execute_in_transaction(statements).await
    }
}

/// Applies units to the live database
///
/// Guards are resolved against a fresh snapshot of the unit's table right before
/// execution, so re-applying a unit only runs what is still missing.
pub struct DatabaseSink {
    executor: SqlExecutor,
    introspector: SqlIntrospector,
    renderer: MigrationRenderer,
    normalizer: TypeNormalizer,
    transactional: bool,
}

impl DatabaseSink {
    /// Create a new database sink
    pub fn new(
        connection: DatabaseConnection,
        schema: Option<String>,
        normalizer: TypeNormalizer,
        transactional: bool,
    ) -> Self {
        let renderer = MigrationRenderer::new(connection.dialect());

        Self {
            introspector: SqlIntrospector::new(connection.clone(), schema),
            executor: SqlExecutor::new(connection),
            renderer,
            normalizer,
            transactional,
        }
    }

    async fn apply(&self, unit: &MigrationUnit) -> Result<()> {
        let snapshot = self.introspector.snapshot(&unit.table).await?;
        let operations = unit.resolve(&snapshot, &self.normalizer);

        if operations.is_empty() {
            tracing::info!(unit = %unit.name, "Nothing left to apply");
            return Ok(());
        }

        let statements = self
            .renderer
            .render_resolved(&unit.table, &operations, &snapshot)?;

        tracing::info!(
            unit = %unit.name,
            statements = statements.len(),
            "Applying migration"
        );

        if self.transactional {
            self.executor.execute_in_transaction(&statements).await
        } else {
            self.executor.execute_batch(&statements).await
        }
    }
}

#[async_trait]
impl MigrationSink for DatabaseSink {
    async fn persist(&self, unit: &MigrationUnit) -> Result<()> {
        self.apply(unit)
            .await
            .map_err(|e| Error::persistence(&unit.name, e))?;

        tracing::info!(unit = %unit.name, "Migration applied successfully");
        Ok(())
    }
}
