//! Migration persistence
//!
//! This module hands generated migration units to their destination.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{MigrationFormat, MigrationsConfig};
use crate::error::{Error, Result};
use crate::schema::analyzer::MemorySchema;
use crate::schema::generator::{Dialect, MigrationRenderer};
use crate::schema::normalize::TypeNormalizer;
use crate::schema::operations::MigrationUnit;
use crate::utils::naming;

/// Destination for migration units
#[async_trait]
pub trait MigrationSink: Send + Sync {
    /// Persist one unit; a unit is either fully handed over or not at all
    async fn persist(&self, unit: &MigrationUnit) -> Result<()>;
}

/// Writes each unit to its own file
pub struct FileSink {
    directory: PathBuf,
    format: MigrationFormat,
    renderer: MigrationRenderer,
}

impl FileSink {
    /// Create a new file sink
    pub fn new<P: AsRef<Path>>(directory: P, format: MigrationFormat, dialect: Dialect) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            format,
            renderer: MigrationRenderer::new(dialect),
        }
    }

    /// Create a file sink from migration settings
    pub fn from_config(config: &MigrationsConfig, dialect: Dialect) -> Self {
        Self::new(&config.directory, config.format, dialect)
    }

    /// Path the unit is written to
    pub fn path_for(&self, unit: &MigrationUnit) -> PathBuf {
        let extension = match self.format {
            MigrationFormat::Sql => "sql",
            MigrationFormat::Json => "json",
        };

        let stem = naming::format_file_name(&unit.file_stem());
        self.directory.join(format!("{}.{}", stem, extension))
    }

    fn contents(&self, unit: &MigrationUnit) -> Result<String> {
        match self.format {
            MigrationFormat::Sql => Ok(self.renderer.render(unit)?.to_sql_file()),
            MigrationFormat::Json => Ok(serde_json::to_string_pretty(unit)?),
        }
    }
}

#[async_trait]
impl MigrationSink for FileSink {
    async fn persist(&self, unit: &MigrationUnit) -> Result<()> {
        // Render before touching the filesystem so a failed unit leaves no file
        let contents = self
            .contents(unit)
            .map_err(|e| Error::persistence(&unit.name, e))?;

        fs::create_dir_all(&self.directory).map_err(|e| Error::persistence(&unit.name, e))?;

        let path = self.path_for(unit);
        fs::write(&path, contents).map_err(|e| Error::persistence(&unit.name, e))?;

        tracing::info!(unit = %unit.name, path = %path.display(), "Migration written");
        Ok(())
    }
}

/// Keeps units in memory, optionally applying them to a [`MemorySchema`]
#[derive(Clone, Default)]
pub struct MemorySink {
    units: Arc<Mutex<Vec<MigrationUnit>>>,
    target: Option<(MemorySchema, TypeNormalizer)>,
}

impl MemorySink {
    /// Create a sink that only records units
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that also applies each unit to `schema`
    pub fn applying_to(schema: MemorySchema, normalizer: TypeNormalizer) -> Self {
        Self {
            units: Arc::default(),
            target: Some((schema, normalizer)),
        }
    }

    /// Units persisted so far, in order
    pub fn units(&self) -> Vec<MigrationUnit> {
        self.units
            .lock()
            .map(|units| units.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl MigrationSink for MemorySink {
    async fn persist(&self, unit: &MigrationUnit) -> Result<()> {
        if let Some((schema, normalizer)) = &self.target {
            schema
                .apply_unit(unit, normalizer)
                .map_err(|e| Error::persistence(&unit.name, e))?;
        }

        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(unit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::operations::{Guard, GuardedOperation, Operation, TableExtras, UnitKind};
    use crate::schema::types::{AbstractType, FieldSpec, OnDelete};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn create_unit() -> MigrationUnit {
        MigrationUnit {
            name: "create_products_table".to_string(),
            kind: UnitKind::Table,
            table: "products".to_string(),
            operations: vec![GuardedOperation::new(
                Guard::TableExists,
                Operation::CreateTable {
                    table: "products".to_string(),
                    fields: vec![FieldSpec::new("price", AbstractType::Integer).nullable(true)],
                    extras: TableExtras::default(),
                },
            )],
            generated_at: Utc.with_ymd_and_hms(2024, 9, 7, 10, 54, 24).unwrap(),
            sequence: 1,
        }
    }

    #[tokio::test]
    async fn test_sql_file_is_written() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path(), MigrationFormat::Sql, Dialect::Postgres);

        sink.persist(&create_unit()).await.unwrap();

        let path = dir.path().join("20240907105424_0001_create_products_table.sql");
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("-- up\nCREATE TABLE IF NOT EXISTS \"products\""));
        assert!(contents.contains("-- down\nDROP TABLE IF EXISTS \"products\";"));
    }

    #[tokio::test]
    async fn test_json_file_round_trips() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("nested"), MigrationFormat::Json, Dialect::Sqlite);
        let unit = create_unit();

        sink.persist(&unit).await.unwrap();

        let contents = fs::read_to_string(sink.path_for(&unit)).unwrap();
        let parsed: MigrationUnit = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, unit);
    }

    #[tokio::test]
    async fn test_render_failure_leaves_no_file() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path(), MigrationFormat::Sql, Dialect::Sqlite);
        let mut unit = create_unit();
        unit.name = "add_foreign_keys_for_products_table".to_string();
        unit.kind = UnitKind::ForeignKeys;
        unit.operations = vec![GuardedOperation::new(
            Guard::ForeignKeyMissing,
            Operation::AddForeignKey {
                column: "brand_id".to_string(),
                references: "id".to_string(),
                on: "brands".to_string(),
                on_delete: OnDelete::Cascade,
            },
        )];

        let err = sink.persist(&unit).await.unwrap_err();

        assert!(matches!(err, Error::PersistenceFailure { ref unit, .. } if unit == "add_foreign_keys_for_products_table"));
        assert!(!sink.path_for(&unit).exists());
    }

    #[tokio::test]
    async fn test_memory_sink_applies_units() {
        let schema = MemorySchema::new();
        let sink = MemorySink::applying_to(schema.clone(), TypeNormalizer::new());

        sink.persist(&create_unit()).await.unwrap();

        assert_eq!(sink.units().len(), 1);
        assert!(schema.snapshot_of("products").has_column("price"));
    }
}
