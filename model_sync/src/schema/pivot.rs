//! Junction table naming and planning

use crate::error::{Error, Result};
use crate::schema::operations::{JunctionColumn, Operation, TableExtras, IDENTITY_COLUMN};
use crate::schema::types::{ManyToMany, RelationshipSpec};
use crate::utils::naming;

/// Canonical junction table name for two tables, independent of their order
///
/// `("products", "tags")` and `("tags", "products")` both give `product_tag`.
pub fn junction_name(first: &str, second: &str, separator: &str) -> String {
    let mut parts = [singular_snake(first), singular_snake(second)];
    parts.sort();
    parts.join(separator)
}

fn singular_snake(table: &str) -> String {
    naming::singularize(&naming::apply_naming_convention(table.trim(), "snake_case"))
}

/// Plans junction tables for many-to-many relationships
pub struct JunctionPlanner {
    extras: TableExtras,
    separator: String,
}

impl JunctionPlanner {
    pub fn new(extras: TableExtras, separator: &str) -> Self {
        Self {
            extras,
            separator: separator.to_string(),
        }
    }

    /// Junction name for a relationship, validating both participants
    pub fn name_for(&self, entity: &str, relationship: &ManyToMany) -> Result<String> {
        let invalid = |message: String| Error::Configuration {
            entity: entity.to_string(),
            relationship: RelationshipSpec::ManyToMany(relationship.clone()).label(),
            message,
        };

        for table in [&relationship.table1, &relationship.table2] {
            let trimmed = table.trim();
            if trimmed.is_empty() {
                return Err(invalid("junction participant is blank".to_string()));
            }
            if !naming::is_valid_identifier(trimmed) {
                return Err(invalid(format!("invalid junction participant `{}`", trimmed)));
            }
        }

        let first = singular_snake(&relationship.table1);
        let second = singular_snake(&relationship.table2);
        if first == second {
            return Err(invalid(format!(
                "both participants resolve to `{}`; junction columns would collide",
                first
            )));
        }

        Ok(junction_name(
            &relationship.table1,
            &relationship.table2,
            &self.separator,
        ))
    }

    /// Operation creating the junction table, or `None` when it already exists
    ///
    /// Existing junction tables are never altered.
    pub fn plan<F>(
        &self,
        entity: &str,
        relationship: &ManyToMany,
        table_exists: F,
    ) -> Result<Option<Operation>>
    where
        F: Fn(&str) -> bool,
    {
        let name = self.name_for(entity, relationship)?;

        if table_exists(&name) {
            return Ok(None);
        }

        Ok(Some(Operation::CreateJunctionTable {
            table: name,
            first: junction_column(&relationship.table1),
            second: junction_column(&relationship.table2),
            extras: self.extras,
        }))
    }
}

fn junction_column(table: &str) -> JunctionColumn {
    let target = naming::apply_naming_convention(table.trim(), "snake_case");

    JunctionColumn {
        column: format!("{}_id", naming::singularize(&target)),
        references: IDENTITY_COLUMN.to_string(),
        on: target,
    }
}
