//! Relationship resolution
//!
//! Turns belongs-to declarations into the column and constraint operations needed to
//! back them. Many-to-many declarations are left to the junction planner.

use crate::error::{Error, Result};
use crate::schema::normalize::TypeNormalizer;
use crate::schema::operations::{Guard, GuardedOperation, Operation};
use crate::schema::types::{
    AbstractType, FieldSpec, LiveIndexSet, OnDelete, RelationshipSpec, SingleReference,
    TableSnapshot,
};
use crate::utils::naming;

/// Operations produced for an entity's foreign keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRelationships {
    /// Foreign key backing columns to create or repair
    pub column_ops: Vec<GuardedOperation>,
    /// Constraint drops and additions
    pub constraint_ops: Vec<GuardedOperation>,
    /// Relationships skipped in lenient mode
    pub skipped: Vec<String>,
}

impl ResolvedRelationships {
    pub fn has_constraints(&self) -> bool {
        !self.constraint_ops.is_empty()
    }
}

/// A belongs-to declaration with every name filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub column: String,
    pub target_table: String,
    pub target_key: String,
    pub on_delete: OnDelete,
    pub strict: bool,
}

impl ResolvedReference {
    /// Set-null references need a nullable column; strict ones never get one
    pub fn nullable(&self) -> bool {
        self.on_delete == OnDelete::SetNull
    }

    /// The shape the backing column must have
    pub fn backing_field(&self) -> FieldSpec {
        FieldSpec::new(&self.column, AbstractType::UnsignedBigInteger).nullable(self.nullable())
    }
}

/// Resolves relationship declarations for one table
pub struct RelationshipResolver<'a> {
    normalizer: &'a TypeNormalizer,
    lenient: bool,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(normalizer: &'a TypeNormalizer, lenient: bool) -> Self {
        Self { normalizer, lenient }
    }

    /// Resolve every belongs-to relationship of `entity` against the live table
    pub fn resolve(
        &self,
        entity: &str,
        relationships: &[RelationshipSpec],
        snapshot: &TableSnapshot,
    ) -> Result<ResolvedRelationships> {
        let mut resolved = ResolvedRelationships::default();

        for relationship in relationships {
            let reference = match relationship {
                RelationshipSpec::BelongsTo(reference) => reference,
                RelationshipSpec::ManyToMany(_) => continue,
            };

            let target = match resolve_reference(entity, relationship, reference) {
                Ok(target) => target,
                Err(err) if self.lenient => {
                    tracing::warn!(
                        entity = %entity,
                        relationship = %relationship.label(),
                        error = %err,
                        "Skipping malformed relationship"
                    );
                    resolved.skipped.push(relationship.label());
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Some(op) = self.column_operation(&target, snapshot) {
                resolved.column_ops.push(op);
            }
            resolved
                .constraint_ops
                .extend(constraint_operations(&target, &snapshot.indexes));
        }

        Ok(resolved)
    }

    /// Create the backing column when missing, repair it when misshapen
    fn column_operation(
        &self,
        target: &ResolvedReference,
        snapshot: &TableSnapshot,
    ) -> Option<GuardedOperation> {
        let field = target.backing_field();

        let current = match snapshot.column(&target.column) {
            None => {
                return Some(GuardedOperation::new(
                    Guard::ColumnExists,
                    Operation::AddColumn { field },
                ))
            }
            Some(current) => current,
        };

        let wrong_type =
            self.normalizer.normalize(&current.native_type) != AbstractType::UnsignedBigInteger;
        // Strict references also pin nullability
        let wrong_shape = wrong_type || (target.strict && current.nullable != field.nullable);

        if wrong_shape {
            tracing::debug!(
                table = %snapshot.table,
                column = %target.column,
                live_type = %current.native_type,
                "Repairing foreign key column"
            );
            Some(GuardedOperation::new(
                Guard::ColumnExists,
                Operation::AlterColumn { field },
            ))
        } else {
            None
        }
    }
}

/// Drop any constraint already covering the column, then add the declared one
fn constraint_operations(target: &ResolvedReference, indexes: &LiveIndexSet) -> Vec<GuardedOperation> {
    let mut ops = Vec::new();

    if indexes.covers(&target.column) {
        ops.push(GuardedOperation::new(
            Guard::ForeignKeyPresent,
            Operation::DropForeignKey {
                column: target.column.clone(),
            },
        ));
    }

    ops.push(GuardedOperation::new(
        Guard::ForeignKeyMissing,
        Operation::AddForeignKey {
            column: target.column.clone(),
            references: target.target_key.clone(),
            on: target.target_table.clone(),
            on_delete: target.on_delete,
        },
    ));

    ops
}

/// Fill in the names of a belongs-to declaration, rejecting malformed ones
pub fn resolve_reference(
    entity: &str,
    relationship: &RelationshipSpec,
    reference: &SingleReference,
) -> Result<ResolvedReference> {
    let invalid = |message: String| Error::Configuration {
        entity: entity.to_string(),
        relationship: relationship.label(),
        message,
    };

    let target_table = match (non_blank(&reference.table), non_blank(&reference.entity)) {
        (Some(table), _) => table.to_string(),
        (None, Some(target_entity)) => naming::get_table_name(target_entity, "snake_case", true),
        (None, None) => return Err(invalid("no target table or entity".to_string())),
    };

    if !naming::is_valid_identifier(&target_table) {
        return Err(invalid(format!("invalid target table `{}`", target_table)));
    }

    let column = match (non_blank(&reference.column), reference.strict) {
        (Some(column), _) => column.to_string(),
        (None, true) => format!("{}_id", naming::singularize(&target_table)),
        (None, false) => return Err(invalid("no local column".to_string())),
    };

    if !naming::is_valid_identifier(&column) {
        return Err(invalid(format!("invalid column `{}`", column)));
    }

    if !naming::is_valid_identifier(&reference.field) {
        return Err(invalid(format!("invalid target key `{}`", reference.field)));
    }

    if reference.strict && reference.on_delete == OnDelete::SetNull {
        return Err(invalid(
            "strict references are non-nullable and cannot use `set null`".to_string(),
        ));
    }

    Ok(ResolvedReference {
        column,
        target_table,
        target_key: reference.field.clone(),
        on_delete: reference.on_delete,
        strict: reference.strict,
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
