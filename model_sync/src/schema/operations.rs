//! Structured schema operations and migration units
//!
//! Operations are plain data. Each one is paired with a [`Guard`] when it is generated;
//! resolving a guarded operation against a fresh [`TableSnapshot`] yields the concrete
//! operations that still need to run, which makes re-applying a unit a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchemaConfig;
use crate::schema::diff::column_matches;
use crate::schema::normalize::{native_name, TypeNormalizer};
use crate::schema::types::{
    AbstractType, FieldSpec, IndexKind, LiveColumn, LiveIndex, OnDelete, TableSnapshot,
};
use crate::utils::naming;

/// Name of the implicit identity column
pub const IDENTITY_COLUMN: &str = "id";

/// Implicit columns attached to created tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableExtras {
    pub identity: bool,
    pub timestamps: bool,
    pub soft_deletes: bool,
}

impl Default for TableExtras {
    fn default() -> Self {
        Self {
            identity: true,
            timestamps: true,
            soft_deletes: true,
        }
    }
}

impl TableExtras {
    pub fn from_config(config: &SchemaConfig) -> Self {
        Self {
            identity: config.add_identity,
            timestamps: config.add_timestamps,
            soft_deletes: config.add_soft_deletes,
        }
    }

    /// Creation/update/soft-delete marker columns
    pub fn bookkeeping_fields(&self) -> Vec<FieldSpec> {
        let mut fields = Vec::new();

        if self.timestamps {
            fields.push(FieldSpec::new("created_at", AbstractType::Timestamp).nullable(true));
            fields.push(FieldSpec::new("updated_at", AbstractType::Timestamp).nullable(true));
        }
        if self.soft_deletes {
            fields.push(FieldSpec::new("deleted_at", AbstractType::Timestamp).nullable(true));
        }

        fields
    }
}

/// One foreign key column of a junction table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionColumn {
    pub column: String,
    pub references: String,
    pub on: String,
}

/// An atomic schema directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddColumn {
        field: FieldSpec,
    },
    AlterColumn {
        field: FieldSpec,
    },
    AddForeignKey {
        column: String,
        references: String,
        on: String,
        on_delete: OnDelete,
    },
    DropForeignKey {
        column: String,
    },
    CreateTable {
        table: String,
        fields: Vec<FieldSpec>,
        extras: TableExtras,
    },
    CreateJunctionTable {
        table: String,
        first: JunctionColumn,
        second: JunctionColumn,
        extras: TableExtras,
    },
}

impl Operation {
    /// Column the operation targets, if it targets a single one
    pub fn column(&self) -> Option<&str> {
        match self {
            Operation::AddColumn { field } | Operation::AlterColumn { field } => Some(&field.name),
            Operation::AddForeignKey { column, .. } | Operation::DropForeignKey { column } => {
                Some(column)
            }
            Operation::CreateTable { .. } | Operation::CreateJunctionTable { .. } => None,
        }
    }

    /// Short description used in logs
    pub fn describe(&self) -> String {
        match self {
            Operation::AddColumn { field } => format!("add column {}", field.name),
            Operation::AlterColumn { field } => format!("alter column {}", field.name),
            Operation::AddForeignKey {
                column,
                references,
                on,
                ..
            } => format!("add foreign key {} -> {}.{}", column, on, references),
            Operation::DropForeignKey { column } => format!("drop foreign key {}", column),
            Operation::CreateTable { table, .. } => format!("create table {}", table),
            Operation::CreateJunctionTable { table, .. } => {
                format!("create junction table {}", table)
            }
        }
    }

    /// Record the effect of the operation on a snapshot of its table
    pub fn apply_to(&self, snapshot: &mut TableSnapshot) {
        match self {
            Operation::CreateTable { fields, extras, .. } => {
                let columns = fields.iter().map(live_column).collect();
                create_table(snapshot, extras, columns);
            }
            Operation::CreateJunctionTable {
                first,
                second,
                extras,
                ..
            } => {
                let columns = [first, second]
                    .iter()
                    .map(|junction| {
                        live_column(&FieldSpec::new(
                            &junction.column,
                            AbstractType::UnsignedBigInteger,
                        ))
                    })
                    .collect();
                create_table(snapshot, extras, columns);
                for junction in [first, second] {
                    snapshot.indexes.push(foreign_key_index(&snapshot.table, &junction.column));
                }
            }
            Operation::AddColumn { field } | Operation::AlterColumn { field } => {
                let column = live_column(field);
                match snapshot.columns.iter_mut().find(|c| c.name == field.name) {
                    Some(current) => *current = column,
                    None => snapshot.columns.push(column),
                }
            }
            Operation::AddForeignKey { column, .. } => {
                let index = foreign_key_index(&snapshot.table, column);
                snapshot.indexes.push(index);
            }
            Operation::DropForeignKey { column } => snapshot.indexes.remove_foreign_keys_on(column),
        }
    }
}

fn live_column(field: &FieldSpec) -> LiveColumn {
    LiveColumn {
        name: field.name.clone(),
        native_type: native_name(&field.field_type),
        nullable: field.nullable,
        default: field.default.as_ref().map(|value| value.to_sql_literal()),
    }
}

fn foreign_key_index(table: &str, column: &str) -> LiveIndex {
    let name = naming::get_foreign_key_name(table, column, naming::get_max_identifier_length("postgres"));
    LiveIndex::new(&name, &[column], IndexKind::Foreign)
}

fn create_table(snapshot: &mut TableSnapshot, extras: &TableExtras, columns: Vec<LiveColumn>) {
    snapshot.exists = true;
    snapshot.columns.clear();
    snapshot.indexes.0.clear();

    if extras.identity {
        snapshot.columns.push(LiveColumn::new(IDENTITY_COLUMN, "bigint"));
        snapshot.indexes.push(LiveIndex::new(
            &format!("{}_pkey", snapshot.table),
            &[IDENTITY_COLUMN],
            IndexKind::Primary,
        ));
    }
    snapshot.columns.extend(columns);
    snapshot
        .columns
        .extend(extras.bookkeeping_fields().iter().map(live_column));
}

/// Existence check evaluated before an operation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Create the table when absent; a plain table is merged column by column otherwise
    TableExists,
    /// Add the column when absent, alter it in place when present and different
    ColumnExists,
    /// Add the column only when absent
    ColumnMissing,
    /// Apply only when a constraint already covers the column
    ForeignKeyPresent,
    /// Apply only when no constraint covers the column
    ForeignKeyMissing,
}

/// An operation paired with its existence guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedOperation {
    pub guard: Guard,
    pub operation: Operation,
}

impl GuardedOperation {
    pub fn new(guard: Guard, operation: Operation) -> Self {
        Self { guard, operation }
    }

    /// Concrete operations still needed against `snapshot`
    pub fn resolve(&self, snapshot: &TableSnapshot, normalizer: &TypeNormalizer) -> Vec<Operation> {
        match (&self.guard, &self.operation) {
            (Guard::TableExists, Operation::CreateTable { fields, extras, .. }) => {
                if !snapshot.exists {
                    return vec![self.operation.clone()];
                }

                // Merge into the existing table
                let mut merged: Vec<Operation> = fields
                    .iter()
                    .filter_map(|field| upsert_column(field, snapshot, normalizer))
                    .collect();
                merged.extend(
                    extras
                        .bookkeeping_fields()
                        .into_iter()
                        .filter(|field| !snapshot.has_column(&field.name))
                        .map(|field| Operation::AddColumn { field }),
                );
                merged
            }
            (Guard::TableExists, _) => {
                if snapshot.exists {
                    Vec::new()
                } else {
                    vec![self.operation.clone()]
                }
            }
            (
                Guard::ColumnExists,
                Operation::AddColumn { field } | Operation::AlterColumn { field },
            ) => upsert_column(field, snapshot, normalizer).into_iter().collect(),
            (Guard::ColumnMissing, Operation::AddColumn { field }) => {
                if snapshot.has_column(&field.name) {
                    Vec::new()
                } else {
                    vec![self.operation.clone()]
                }
            }
            (Guard::ForeignKeyPresent, op) | (Guard::ForeignKeyMissing, op) => {
                let covered = op
                    .column()
                    .map(|column| snapshot.indexes.has_foreign_key_on(column))
                    .unwrap_or(false);
                let wanted = self.guard == Guard::ForeignKeyPresent;
                if covered == wanted {
                    vec![op.clone()]
                } else {
                    Vec::new()
                }
            }
            // Guard does not apply to this operation kind
            (_, op) => vec![op.clone()],
        }
    }
}

/// Add, alter or skip a column depending on what already exists
fn upsert_column(
    field: &FieldSpec,
    snapshot: &TableSnapshot,
    normalizer: &TypeNormalizer,
) -> Option<Operation> {
    match snapshot.column(&field.name) {
        None => Some(Operation::AddColumn {
            field: field.clone(),
        }),
        Some(current) if column_matches(field, current, normalizer) => None,
        Some(_) => Some(Operation::AlterColumn {
            field: field.clone(),
        }),
    }
}

/// Concern a migration unit covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Table creation or column sync
    Table,
    ForeignKeys,
    Junction,
}

/// An ordered batch of guarded operations against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub name: String,
    pub kind: UnitKind,
    pub table: String,
    pub operations: Vec<GuardedOperation>,
    pub generated_at: DateTime<Utc>,
    /// Position of the unit within its run
    pub sequence: u32,
}

impl MigrationUnit {
    /// File stem ordering units by generation time, then sequence
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{:04}_{}",
            self.generated_at.format("%Y%m%d%H%M%S"),
            self.sequence,
            self.name
        )
    }

    /// Whether the unit creates the table it targets
    pub fn creates_table(&self) -> bool {
        self.operations.iter().any(|op| {
            matches!(
                op.operation,
                Operation::CreateTable { .. } | Operation::CreateJunctionTable { .. }
            )
        })
    }

    /// The bare operations, without guards
    pub fn plain_operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(|guarded| &guarded.operation)
    }

    /// Concrete operations still needed against `snapshot`
    ///
    /// Guards are evaluated in order, each one seeing the effect of the operations
    /// resolved before it.
    pub fn resolve(&self, snapshot: &TableSnapshot, normalizer: &TypeNormalizer) -> Vec<Operation> {
        let mut state = snapshot.clone();
        let mut resolved = Vec::new();

        for guarded in &self.operations {
            for operation in guarded.resolve(&state, normalizer) {
                operation.apply_to(&mut state);
                resolved.push(operation);
            }
        }

        resolved
    }
}
