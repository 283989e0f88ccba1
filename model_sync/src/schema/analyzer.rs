//! Live schema introspection
//!
//! This module reports the current structure of individual tables. [`SqlIntrospector`]
//! queries the database catalogs; [`MemorySchema`] keeps tables in memory and can be
//! loaded from a JSON snapshot for offline runs.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySql, Pool, Postgres, Row, Sqlite};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::normalize::TypeNormalizer;
use crate::schema::operations::{MigrationUnit, Operation};
use crate::schema::types::{IndexKind, LiveColumn, LiveIndex, LiveIndexSet, TableSnapshot};
use crate::utils::naming;

/// Source of live table structure
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Columns and indexes of `table`, or a missing snapshot when it does not exist
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot>;

    /// Whether `table` exists
    async fn table_exists(&self, table: &str) -> Result<bool>;
}

/// Catalog-backed introspector
pub struct SqlIntrospector {
    connection: DatabaseConnection,
    schema: Option<String>,
}

impl SqlIntrospector {
    /// Create a new introspector; `schema` defaults to `public` on PostgreSQL and the
    /// connected database on MySQL
    pub fn new(connection: DatabaseConnection, schema: Option<String>) -> Self {
        Self { connection, schema }
    }

    async fn introspect(&self, table: &str) -> Result<TableSnapshot> {
        if !naming::is_valid_identifier(table) {
            return Err(Error::ValidationError(format!("Invalid table name: {}", table)));
        }

        match &self.connection {
            DatabaseConnection::Postgres(pool) => {
                PostgresIntrospector {
                    pool,
                    schema: self.schema.as_deref().unwrap_or("public"),
                }
                .snapshot(table)
                .await
            }
            DatabaseConnection::MySql(pool) => {
                MySqlIntrospector {
                    pool,
                    schema: self.schema.as_deref(),
                }
                .snapshot(table)
                .await
            }
            DatabaseConnection::Sqlite(pool) => SqliteIntrospector { pool }.snapshot(table).await,
        }
    }
}

#[async_trait]
impl Introspector for SqlIntrospector {
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        let snapshot = self
            .introspect(table)
            .await
            .map_err(|e| Error::introspection(table, e))?;

        tracing::debug!(
            table = %table,
            exists = snapshot.exists,
            columns = snapshot.columns.len(),
            indexes = snapshot.indexes.len(),
            "Introspected table"
        );

        Ok(snapshot)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.snapshot(table).await?.exists)
    }
}

// Row types for catalog queries
#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
}

#[derive(FromRow)]
struct IndexRow {
    index_name: String,
    column_name: String,
    is_unique: bool,
    is_primary: bool,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    column_name: String,
}

/// Group per-column rows into indexes, keeping catalog order
fn collect_indexes(
    indexes: &mut LiveIndexSet,
    rows: impl IntoIterator<Item = (String, String, IndexKind)>,
) {
    let mut grouped: IndexMap<String, LiveIndex> = IndexMap::new();

    for (name, column, kind) in rows {
        grouped
            .entry(name.clone())
            .or_insert_with(|| LiveIndex {
                name,
                columns: Vec::new(),
                kind,
            })
            .columns
            .push(column);
    }

    for index in grouped.into_values() {
        indexes.push(index);
    }
}

fn index_kind(is_primary: bool, is_unique: bool) -> IndexKind {
    match (is_primary, is_unique) {
        (true, _) => IndexKind::Primary,
        (false, true) => IndexKind::Unique,
        (false, false) => IndexKind::Index,
    }
}

/// PostgreSQL introspector
struct PostgresIntrospector<'a> {
    pool: &'a Pool<Postgres>,
    schema: &'a str,
}

impl<'a> PostgresIntrospector<'a> {
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        let sql = r#"
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2 AND table_type = 'BASE TABLE'
        "#;

        let found = sqlx::query(sql)
            .bind(self.schema)
            .bind(table)
            .fetch_optional(self.pool)
            .await?;

        if found.is_none() {
            return Ok(TableSnapshot::missing(table));
        }

        // Columns
        let sql = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let columns = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(self.schema)
            .bind(table)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|col| LiveColumn {
                name: col.column_name,
                native_type: col.data_type,
                nullable: col.is_nullable == "YES",
                default: col.column_default,
            })
            .collect();

        // Indexes, including the primary key
        let sql = r#"
            SELECT
                i.relname::text AS index_name,
                a.attname::text AS column_name,
                ix.indisunique AS is_unique,
                ix.indisprimary AS is_primary
            FROM
                pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE
                t.relname = $1
                AND n.nspname = $2
            ORDER BY i.relname, a.attnum
        "#;

        let index_rows = sqlx::query_as::<_, IndexRow>(sql)
            .bind(table)
            .bind(self.schema)
            .fetch_all(self.pool)
            .await?;

        // Foreign keys
        let sql = r#"
            SELECT
                tc.constraint_name::text AS constraint_name,
                kcu.column_name::text AS column_name
            FROM
                information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE
                tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = $1
                AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;

        let fk_rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(self.schema)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut indexes = LiveIndexSet::new();
        collect_indexes(
            &mut indexes,
            index_rows.into_iter().map(|row| {
                let kind = index_kind(row.is_primary, row.is_unique);
                (row.index_name, row.column_name, kind)
            }),
        );
        collect_indexes(
            &mut indexes,
            fk_rows
                .into_iter()
                .map(|row| (row.constraint_name, row.column_name, IndexKind::Foreign)),
        );

        Ok(TableSnapshot::existing(table, columns, indexes))
    }
}

/// MySQL introspector
struct MySqlIntrospector<'a> {
    pool: &'a Pool<MySql>,
    schema: Option<&'a str>,
}

impl<'a> MySqlIntrospector<'a> {
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        let schema: String = match self.schema {
            Some(schema) => schema.to_string(),
            None => sqlx::query("SELECT CAST(DATABASE() AS CHAR) AS db")
                .fetch_one(self.pool)
                .await?
                .try_get("db")?,
        };

        let sql = r#"
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = ? AND table_name = ? AND table_type = 'BASE TABLE'
        "#;

        let found = sqlx::query(sql)
            .bind(&schema)
            .bind(table)
            .fetch_optional(self.pool)
            .await?;

        if found.is_none() {
            return Ok(TableSnapshot::missing(table));
        }

        // COLUMN_TYPE keeps modifiers such as `unsigned` and `tinyint(1)`
        let sql = r#"
            SELECT
                CAST(column_name AS CHAR) AS column_name,
                CAST(column_type AS CHAR) AS data_type,
                CAST(is_nullable AS CHAR) AS is_nullable,
                CAST(column_default AS CHAR) AS column_default
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
        "#;

        let columns = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(&schema)
            .bind(table)
            .fetch_all(self.pool)
            .await?
            .into_iter()
            .map(|col| LiveColumn {
                name: col.column_name,
                native_type: col.data_type,
                nullable: col.is_nullable == "YES",
                default: col.column_default,
            })
            .collect();

        let sql = r#"
            SELECT
                CAST(index_name AS CHAR) AS index_name,
                CAST(column_name AS CHAR) AS column_name,
                non_unique = 0 AS is_unique,
                index_name = 'PRIMARY' AS is_primary
            FROM information_schema.statistics
            WHERE table_schema = ? AND table_name = ?
            ORDER BY index_name, seq_in_index
        "#;

        let index_rows = sqlx::query(sql)
            .bind(&schema)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let sql = r#"
            SELECT
                CAST(constraint_name AS CHAR) AS constraint_name,
                CAST(column_name AS CHAR) AS column_name
            FROM information_schema.key_column_usage
            WHERE table_schema = ? AND table_name = ? AND referenced_table_name IS NOT NULL
            ORDER BY constraint_name, ordinal_position
        "#;

        let fk_rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(&schema)
            .bind(table)
            .fetch_all(self.pool)
            .await?;

        let mut rows: Vec<(String, String, IndexKind)> = Vec::with_capacity(index_rows.len());
        for row in index_rows {
            // Comparisons come back as integers
            let is_unique: i64 = row.try_get("is_unique")?;
            let is_primary: i64 = row.try_get("is_primary")?;
            rows.push((
                row.try_get("index_name")?,
                row.try_get("column_name")?,
                index_kind(is_primary != 0, is_unique != 0),
            ));
        }

        let mut indexes = LiveIndexSet::new();
        collect_indexes(&mut indexes, rows);
        collect_indexes(
            &mut indexes,
            fk_rows
                .into_iter()
                .map(|row| (row.constraint_name, row.column_name, IndexKind::Foreign)),
        );

        Ok(TableSnapshot::existing(table, columns, indexes))
    }
}

/// SQLite introspector
struct SqliteIntrospector<'a> {
    pool: &'a Pool<Sqlite>,
}

impl<'a> SqliteIntrospector<'a> {
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        let sql = r#"SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?"#;
        let found = sqlx::query(sql)
            .bind(table)
            .fetch_optional(self.pool)
            .await?;

        if found.is_none() {
            return Ok(TableSnapshot::missing(table));
        }

        // Table names are validated identifiers, so they can be spliced into pragmas
        let pragma = format!("PRAGMA table_info(\"{}\")", table);
        let mut columns = Vec::new();
        let mut primary = Vec::new();

        for col in sqlx::query(&pragma).fetch_all(self.pool).await? {
            let name: String = col.try_get("name")?;
            let data_type: String = col.try_get("type")?;
            let notnull: i64 = col.try_get("notnull")?;
            let dflt_value: Option<String> = col.try_get("dflt_value")?;
            let pk: i64 = col.try_get("pk")?;

            if pk > 0 {
                primary.push((format!("{}_pkey", table), name.clone(), IndexKind::Primary));
            }

            columns.push(LiveColumn {
                name,
                native_type: data_type,
                nullable: notnull == 0,
                default: dflt_value,
            });
        }

        let mut indexes = LiveIndexSet::new();
        collect_indexes(&mut indexes, primary);

        let pragma = format!("PRAGMA index_list(\"{}\")", table);
        for index in sqlx::query(&pragma).fetch_all(self.pool).await? {
            let name: String = index.try_get("name")?;
            let unique: i64 = index.try_get("unique")?;
            let origin: String = index.try_get("origin")?;

            let info = format!("PRAGMA index_info(\"{}\")", name.replace('"', "\"\""));
            let mut rows = Vec::new();
            for column in sqlx::query(&info).fetch_all(self.pool).await? {
                let column_name: Option<String> = column.try_get("name")?;
                if let Some(column_name) = column_name {
                    rows.push((
                        name.clone(),
                        column_name,
                        index_kind(origin == "pk", unique != 0),
                    ));
                }
            }
            collect_indexes(&mut indexes, rows);
        }

        // SQLite foreign keys are unnamed; use the conventional name
        let pragma = format!("PRAGMA foreign_key_list(\"{}\")", table);
        let mut rows = Vec::new();
        for fk in sqlx::query(&pragma).fetch_all(self.pool).await? {
            let column: String = fk.try_get("from")?;
            rows.push((
                naming::get_foreign_key_name(table, &column, naming::get_max_identifier_length("sqlite")),
                column,
                IndexKind::Foreign,
            ));
        }
        collect_indexes(&mut indexes, rows);

        Ok(TableSnapshot::existing(table, columns, indexes))
    }
}

/// One table held by a [`MemorySchema`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTable {
    #[serde(default)]
    pub columns: Vec<LiveColumn>,
    #[serde(default)]
    pub indexes: LiveIndexSet,
}

/// In-memory schema shared between an introspector and the units applied to it
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySchema {
    tables: Arc<Mutex<IndexMap<String, MemoryTable>>>,
}

impl MemorySchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot mapping table names to `{columns, indexes}`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let tables: IndexMap<String, MemoryTable> = serde_json::from_str(json)?;
        Ok(Self {
            tables: Arc::new(Mutex::new(tables)),
        })
    }

    /// Load a snapshot file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Loading schema snapshot");
        Self::from_json_str(&content)
    }

    /// Serialize the current tables in snapshot format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.lock())?)
    }

    /// Insert or replace a table
    pub fn insert_table(&self, table: &str, columns: Vec<LiveColumn>, indexes: LiveIndexSet) {
        self.lock()
            .insert(table.to_string(), MemoryTable { columns, indexes });
    }

    /// Names of the tables, in insertion order
    pub fn table_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Current snapshot of `table`
    pub fn snapshot_of(&self, table: &str) -> TableSnapshot {
        match self.lock().get(table) {
            Some(stored) => {
                TableSnapshot::existing(table, stored.columns.clone(), stored.indexes.clone())
            }
            None => TableSnapshot::missing(table),
        }
    }

    /// Apply a unit, evaluating its guards against the current tables
    ///
    /// Returns the operations that actually ran.
    pub fn apply_unit(
        &self,
        unit: &MigrationUnit,
        normalizer: &TypeNormalizer,
    ) -> Result<Vec<Operation>> {
        let mut snapshot = self.snapshot_of(&unit.table);
        let operations = unit.resolve(&snapshot, normalizer);

        for operation in &operations {
            if !snapshot.exists
                && !matches!(
                    operation,
                    Operation::CreateTable { .. } | Operation::CreateJunctionTable { .. }
                )
            {
                return Err(Error::MigrationError(format!(
                    "Cannot {} on missing table `{}`",
                    operation.describe(),
                    unit.table
                )));
            }
            operation.apply_to(&mut snapshot);
        }

        if snapshot.exists {
            self.insert_table(&unit.table, snapshot.columns, snapshot.indexes);
        }

        tracing::debug!(unit = %unit.name, applied = operations.len(), "Applied unit in memory");
        Ok(operations)
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Introspector for MemorySchema {
    async fn snapshot(&self, table: &str) -> Result<TableSnapshot> {
        Ok(self.snapshot_of(table))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().contains_key(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::operations::{Guard, GuardedOperation, TableExtras, UnitKind};
    use crate::schema::types::{AbstractType, FieldSpec};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    const SNAPSHOT: &str = r#"{
        "products": {
            "columns": [
                {"name": "id", "type": "bigint"},
                {"name": "brand_id", "type": "varchar(255)", "nullable": true}
            ],
            "indexes": [
                {"name": "products_pkey", "columns": ["id"], "kind": "primary"}
            ]
        },
        "tags": {}
    }"#;

    #[tokio::test]
    async fn test_snapshot_file_format() {
        let schema = MemorySchema::from_json_str(SNAPSHOT).unwrap();

        let products = schema.snapshot("products").await.unwrap();
        assert!(products.exists);
        assert_eq!(products.columns[1].native_type, "varchar(255)");
        assert!(products.columns[1].nullable);
        assert!(products.indexes.covers("id"));

        assert!(schema.table_exists("tags").await.unwrap());
        assert!(!schema.snapshot("brands").await.unwrap().exists);
        assert_eq!(schema.table_names(), vec!["products", "tags"]);
    }

    #[test]
    fn test_apply_unit_twice_is_a_no_op() {
        let schema = MemorySchema::new();
        let normalizer = TypeNormalizer::new();
        let unit = MigrationUnit {
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
            generated_at: Utc::now(),
            sequence: 1,
        };

        assert_eq!(schema.apply_unit(&unit, &normalizer).unwrap().len(), 1);
        assert!(schema.apply_unit(&unit, &normalizer).unwrap().is_empty());
        assert!(schema.snapshot_of("products").has_column("deleted_at"));
    }

    #[test]
    fn test_column_ops_need_an_existing_table() {
        let schema = MemorySchema::new();
        let unit = MigrationUnit {
            name: "update_products_table".to_string(),
            kind: UnitKind::Table,
            table: "products".to_string(),
            operations: vec![GuardedOperation::new(
                Guard::ColumnExists,
                Operation::AddColumn {
                    field: FieldSpec::new("price", AbstractType::Integer),
                },
            )],
            generated_at: Utc::now(),
            sequence: 1,
        };

        let err = schema.apply_unit(&unit, &TypeNormalizer::new()).unwrap_err();
        assert!(matches!(err, Error::MigrationError(_)));
    }

    #[test]
    fn test_round_trip_through_json() {
        let schema = MemorySchema::from_json_str(SNAPSHOT).unwrap();
        let reloaded = MemorySchema::from_json_str(&schema.to_json().unwrap()).unwrap();

        assert_eq!(reloaded.snapshot_of("products"), schema.snapshot_of("products"));
    }
}
