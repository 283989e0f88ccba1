//! Migration unit emission
//!
//! Packages the operations of a run into at most three kinds of units: one for the
//! entity table, one for its foreign keys and one per missing junction table.

use chrono::{DateTime, Utc};

use crate::schema::diff::ColumnClassification;
use crate::schema::operations::{
    Guard, GuardedOperation, MigrationUnit, Operation, TableExtras, UnitKind,
};
use crate::schema::relationships::ResolvedRelationships;
use crate::schema::types::{FieldSpec, TableSnapshot};

/// Builds migration units for one run, numbering them in emission order
pub struct Emitter {
    extras: TableExtras,
    generated_at: DateTime<Utc>,
    next_sequence: u32,
}

impl Emitter {
    pub fn new(extras: TableExtras, generated_at: DateTime<Utc>) -> Self {
        Self {
            extras,
            generated_at,
            next_sequence: 1,
        }
    }

    /// Unit creating or updating the entity table
    ///
    /// Returns `None` when the table exists and nothing is absent or divergent.
    /// Bookkeeping columns already present in `live` are not added again.
    pub fn table_unit(
        &mut self,
        table: &str,
        live: &TableSnapshot,
        declared: &[FieldSpec],
        classification: &ColumnClassification,
    ) -> Option<MigrationUnit> {
        if !live.exists {
            let create = GuardedOperation::new(
                Guard::TableExists,
                Operation::CreateTable {
                    table: table.to_string(),
                    fields: declared.to_vec(),
                    extras: self.extras,
                },
            );
            return Some(self.unit(
                format!("create_{}_table", table),
                UnitKind::Table,
                table,
                vec![create],
            ));
        }

        if classification.is_empty() {
            return None;
        }

        let mut operations: Vec<GuardedOperation> = classification
            .absent
            .iter()
            .map(|field| {
                GuardedOperation::new(
                    Guard::ColumnExists,
                    Operation::AddColumn {
                        field: field.clone(),
                    },
                )
            })
            .collect();

        operations.extend(classification.divergent.iter().map(|field| {
            GuardedOperation::new(
                Guard::ColumnExists,
                Operation::AlterColumn {
                    field: field.clone(),
                },
            )
        }));

        operations.extend(
            self.extras
                .bookkeeping_fields()
                .into_iter()
                .filter(|field| !live.has_column(&field.name))
                .map(|field| {
                    GuardedOperation::new(Guard::ColumnMissing, Operation::AddColumn { field })
                }),
        );

        Some(self.unit(
            format!("update_{}_table", table),
            UnitKind::Table,
            table,
            operations,
        ))
    }

    /// Unit adding foreign keys, emitted only when a constraint is involved
    pub fn foreign_key_unit(
        &mut self,
        table: &str,
        resolved: ResolvedRelationships,
    ) -> Option<MigrationUnit> {
        if !resolved.has_constraints() {
            return None;
        }

        let mut operations = resolved.column_ops;
        operations.extend(resolved.constraint_ops);

        Some(self.unit(
            format!("add_foreign_keys_for_{}_table", table),
            UnitKind::ForeignKeys,
            table,
            operations,
        ))
    }

    /// Unit creating one junction table
    ///
    /// Returns `None` for anything other than a junction creation.
    pub fn junction_unit(&mut self, operation: Operation) -> Option<MigrationUnit> {
        let table = match &operation {
            Operation::CreateJunctionTable { table, .. } => table.clone(),
            _ => return None,
        };

        Some(self.unit(
            format!("create_{}_table", table),
            UnitKind::Junction,
            &table,
            vec![GuardedOperation::new(Guard::TableExists, operation)],
        ))
    }

    fn unit(
        &mut self,
        name: String,
        kind: UnitKind,
        table: &str,
        operations: Vec<GuardedOperation>,
    ) -> MigrationUnit {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        MigrationUnit {
            name,
            kind,
            table: table.to_string(),
            operations,
            generated_at: self.generated_at,
            sequence,
        }
    }
}
