//! Reconciliation of one entity declaration against its live table
//!
//! The [`Reconciler`] runs column reconciliation, relationship resolution and junction
//! planning over data that has already been introspected, and packages the result as a
//! [`Plan`]. It performs no I/O. Malformed relationships fail only the unit they
//! belong to; the remaining units are still planned.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::schema::diff;
use crate::schema::emitter::Emitter;
use crate::schema::normalize::TypeNormalizer;
use crate::schema::operations::{MigrationUnit, Operation, TableExtras};
use crate::schema::pivot::JunctionPlanner;
use crate::schema::relationships::{resolve_reference, RelationshipResolver};
use crate::schema::types::{EntityDeclaration, FieldSpec, RelationshipSpec, TableSnapshot};

/// Knobs for a reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub extras: TableExtras,
    pub lenient_relationships: bool,
    pub pivot_separator: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            extras: TableExtras::default(),
            lenient_relationships: false,
            pivot_separator: "_".to_string(),
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extras: TableExtras::from_config(&config.schema),
            lenient_relationships: config.schema.lenient_relationships,
            pivot_separator: config.naming.pivot_separator.clone(),
        }
    }
}

/// Informational outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    TableCreated { table: String },
    TableUpdated {
        table: String,
        added: usize,
        altered: usize,
    },
    TableUnchanged { table: String },
    ForeignKeysAdded { table: String, count: usize },
    NoForeignKeys { table: String },
    PivotCreated { name: String },
    PivotExists { name: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::TableCreated { table } => write!(f, "Table `{}` will be created", table),
            Notice::TableUpdated {
                table,
                added,
                altered,
            } => write!(
                f,
                "Table `{}` will be updated ({} added, {} altered)",
                table, added, altered
            ),
            Notice::TableUnchanged { table } => {
                write!(f, "Table `{}` already matches its declaration", table)
            }
            Notice::ForeignKeysAdded { table, count } => {
                write!(f, "{} foreign key(s) will be added to `{}`", count, table)
            }
            Notice::NoForeignKeys { table } => write!(f, "No foreign keys for `{}`", table),
            Notice::PivotCreated { name } => write!(f, "Junction table `{}` will be created", name),
            Notice::PivotExists { name } => write!(f, "Junction table `{}` already exists", name),
        }
    }
}

/// A unit that could not be planned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub message: String,
}

/// Result of reconciling one entity
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub units: Vec<MigrationUnit>,
    pub notices: Vec<Notice>,
    pub failures: Vec<UnitFailure>,
}

impl Plan {
    /// True when the live schema already matches and nothing failed
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.failures.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn notice(&mut self, notice: Notice) {
        tracing::info!(notice = %notice, "Reconciliation");
        self.notices.push(notice);
    }

    fn fail(&mut self, unit: String, message: String) {
        tracing::error!(unit = %unit, error = %message, "Unit failed during planning");
        self.failures.push(UnitFailure { unit, message });
    }
}

/// Plans migration units for entity declarations
pub struct Reconciler {
    normalizer: TypeNormalizer,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(normalizer: TypeNormalizer, options: ReconcileOptions) -> Self {
        Self {
            normalizer,
            options,
        }
    }

    pub fn normalizer(&self) -> &TypeNormalizer {
        &self.normalizer
    }

    /// Junction tables the declaration may need, so their existence can be checked
    ///
    /// Malformed many-to-many relationships are left out; [`Reconciler::plan`] reports them.
    pub fn junction_candidates(&self, declaration: &EntityDeclaration) -> Vec<String> {
        let planner = self.junction_planner();

        declaration
            .relationships
            .iter()
            .filter_map(|relationship| match relationship {
                RelationshipSpec::ManyToMany(m2m) => planner.name_for(&declaration.name, m2m).ok(),
                RelationshipSpec::BelongsTo(_) => None,
            })
            .collect()
    }

    /// Reconcile `declaration` against the live state of its table
    ///
    /// `existing_junctions` names the candidate junction tables that already exist.
    pub fn plan(
        &self,
        declaration: &EntityDeclaration,
        snapshot: &TableSnapshot,
        existing_junctions: &HashSet<String>,
        generated_at: DateTime<Utc>,
    ) -> Result<Plan> {
        declaration.validate()?;

        let table = declaration.table_name();
        let mut emitter = Emitter::new(self.options.extras, generated_at);
        let mut plan = Plan::default();

        tracing::debug!(
            entity = %declaration.name,
            table = %table,
            exists = snapshot.exists,
            "Reconciling entity"
        );

        // Table unit
        let fields = self.table_fields(declaration);
        let classification = if snapshot.exists {
            diff::reconcile(&fields, &snapshot.columns, &self.normalizer)
        } else {
            Default::default()
        };

        match emitter.table_unit(&table, snapshot, &fields, &classification) {
            Some(unit) => {
                if unit.creates_table() {
                    plan.notice(Notice::TableCreated {
                        table: table.clone(),
                    });
                } else {
                    plan.notice(Notice::TableUpdated {
                        table: table.clone(),
                        added: classification.absent.len(),
                        altered: classification.divergent.len(),
                    });
                }
                plan.units.push(unit);
            }
            None => plan.notice(Notice::TableUnchanged {
                table: table.clone(),
            }),
        }

        // Foreign key unit
        let resolver =
            RelationshipResolver::new(&self.normalizer, self.options.lenient_relationships);
        match resolver.resolve(&declaration.name, &declaration.relationships, snapshot) {
            Ok(resolved) => {
                let count = resolved
                    .constraint_ops
                    .iter()
                    .filter(|op| matches!(op.operation, Operation::AddForeignKey { .. }))
                    .count();

                match emitter.foreign_key_unit(&table, resolved) {
                    Some(unit) => {
                        plan.notice(Notice::ForeignKeysAdded {
                            table: table.clone(),
                            count,
                        });
                        plan.units.push(unit);
                    }
                    None => plan.notice(Notice::NoForeignKeys {
                        table: table.clone(),
                    }),
                }
            }
            Err(err) => plan.fail(format!("add_foreign_keys_for_{}_table", table), err.to_string()),
        }

        // Junction units
        let planner = self.junction_planner();
        for relationship in &declaration.relationships {
            let m2m = match relationship {
                RelationshipSpec::ManyToMany(m2m) => m2m,
                RelationshipSpec::BelongsTo(_) => continue,
            };

            let planned = planner.plan(&declaration.name, m2m, |name| {
                existing_junctions.contains(name)
            });

            match planned {
                Ok(Some(operation)) => {
                    if let Some(unit) = emitter.junction_unit(operation) {
                        plan.notice(Notice::PivotCreated {
                            name: unit.table.clone(),
                        });
                        plan.units.push(unit);
                    }
                }
                Ok(None) => plan.notice(Notice::PivotExists {
                    name: planner
                        .name_for(&declaration.name, m2m)
                        .unwrap_or_else(|_| relationship.label()),
                }),
                Err(err) if self.options.lenient_relationships => {
                    tracing::warn!(
                        entity = %declaration.name,
                        relationship = %relationship.label(),
                        error = %err,
                        "Skipping malformed relationship"
                    );
                }
                Err(err) => plan.fail(format!("create_junction_for_{}", relationship.label()), err.to_string()),
            }
        }

        Ok(plan)
    }

    /// Declared fields, with belongs-to backing columns taking the relationship's shape
    ///
    /// Malformed relationships leave their field as declared; planning the foreign key
    /// unit reports them.
    fn table_fields(&self, declaration: &EntityDeclaration) -> Vec<FieldSpec> {
        let backing: HashMap<String, FieldSpec> = declaration
            .relationships
            .iter()
            .filter_map(|relationship| match relationship {
                RelationshipSpec::BelongsTo(reference) => {
                    resolve_reference(&declaration.name, relationship, reference).ok()
                }
                RelationshipSpec::ManyToMany(_) => None,
            })
            .map(|reference| (reference.column.clone(), reference.backing_field()))
            .collect();

        declaration
            .fields
            .iter()
            .map(|field| match backing.get(&field.name) {
                Some(shape) => {
                    if shape != field {
                        tracing::warn!(
                            entity = %declaration.name,
                            column = %field.name,
                            "Declared field backs a foreign key; using the key's column shape"
                        );
                    }
                    shape.clone()
                }
                None => field.clone(),
            })
            .collect()
    }

    fn junction_planner(&self) -> JunctionPlanner {
        JunctionPlanner::new(self.options.extras, &self.options.pivot_separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::schema::types::{
        AbstractType, FieldSpec, LiveColumn, LiveIndexSet, ManyToMany, OnDelete, SingleReference,
    };
    use pretty_assertions::assert_eq;

    fn product() -> EntityDeclaration {
        EntityDeclaration::new("Product")
            .field(FieldSpec::new("name", AbstractType::String).length(255).nullable(true))
            .field(FieldSpec::new("price", AbstractType::Integer).nullable(true))
            .relationship(RelationshipSpec::BelongsTo(
                SingleReference::new("brand_id", "brands").on_delete(OnDelete::SetNull),
            ))
            .relationship(RelationshipSpec::ManyToMany(ManyToMany::new("products", "tags")))
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(TypeNormalizer::new(), ReconcileOptions::default())
    }

    #[test]
    fn test_fresh_entity_plans_three_units() {
        let plan = reconciler()
            .plan(&product(), &TableSnapshot::missing("products"), &HashSet::new(), Utc::now())
            .unwrap();

        let names: Vec<&str> = plan.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "create_products_table",
                "add_foreign_keys_for_products_table",
                "create_product_tag_table"
            ]
        );
        assert_eq!(
            plan.notices,
            vec![
                Notice::TableCreated {
                    table: "products".to_string()
                },
                Notice::ForeignKeysAdded {
                    table: "products".to_string(),
                    count: 1
                },
                Notice::PivotCreated {
                    name: "product_tag".to_string()
                },
            ]
        );
        assert!(!plan.has_failures());
    }

    #[test]
    fn test_existing_junction_is_reported() {
        let existing: HashSet<String> = ["product_tag".to_string()].into_iter().collect();
        let plan = reconciler()
            .plan(&product(), &TableSnapshot::missing("products"), &existing, Utc::now())
            .unwrap();

        assert_eq!(plan.units.len(), 2);
        assert!(plan.notices.contains(&Notice::PivotExists {
            name: "product_tag".to_string()
        }));
    }

    #[test]
    fn test_converged_table_reports_unchanged() {
        let declaration = EntityDeclaration::new("Product")
            .field(FieldSpec::new("price", AbstractType::Integer).nullable(true));
        let snapshot = TableSnapshot::existing(
            "products",
            vec![LiveColumn::new("price", "int").nullable(true)],
            LiveIndexSet::new(),
        );

        let plan = reconciler()
            .plan(&declaration, &snapshot, &HashSet::new(), Utc::now())
            .unwrap();

        assert!(plan.is_empty());
        assert_eq!(
            plan.notices,
            vec![
                Notice::TableUnchanged {
                    table: "products".to_string()
                },
                Notice::NoForeignKeys {
                    table: "products".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_malformed_relationship_fails_only_its_unit() {
        let declaration = product().relationship(RelationshipSpec::BelongsTo(SingleReference {
            column: None,
            table: Some("owners".to_string()),
            entity: None,
            field: "id".to_string(),
            on_delete: OnDelete::Restrict,
            strict: false,
        }));

        let plan = reconciler()
            .plan(&declaration, &TableSnapshot::missing("products"), &HashSet::new(), Utc::now())
            .unwrap();

        let names: Vec<&str> = plan.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["create_products_table", "create_product_tag_table"]);
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].unit, "add_foreign_keys_for_products_table");
    }

    #[test]
    fn test_empty_declaration_is_rejected() {
        let err = reconciler()
            .plan(
                &EntityDeclaration::new("Product"),
                &TableSnapshot::missing("products"),
                &HashSet::new(),
                Utc::now(),
            )
            .unwrap_err();

        assert!(matches!(err, Error::EmptySchema(name) if name == "Product"));
    }

    #[test]
    fn test_declared_foreign_key_column_takes_the_key_shape() {
        let declaration = product()
            .field(FieldSpec::new("brand_id", AbstractType::Integer).nullable(false));

        let plan = reconciler()
            .plan(&declaration, &TableSnapshot::missing("products"), &HashSet::new(), Utc::now())
            .unwrap();

        match &plan.units[0].operations[0].operation {
            Operation::CreateTable { fields, .. } => assert_eq!(
                fields[2],
                FieldSpec::new("brand_id", AbstractType::UnsignedBigInteger).nullable(true)
            ),
            other => panic!("expected a table creation, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_foreign_key_column_is_not_reverted() {
        let declaration = product()
            .field(FieldSpec::new("brand_id", AbstractType::Integer).nullable(true));
        let snapshot = TableSnapshot::existing(
            "products",
            vec![
                LiveColumn::new("name", "varchar(255)").nullable(true),
                LiveColumn::new("price", "int").nullable(true),
                LiveColumn::new("brand_id", "bigint").nullable(true),
            ],
            LiveIndexSet::new(),
        );
        let existing: HashSet<String> = ["product_tag".to_string()].into_iter().collect();

        let plan = reconciler()
            .plan(&declaration, &snapshot, &existing, Utc::now())
            .unwrap();

        assert!(plan
            .units
            .iter()
            .flat_map(|unit| unit.plain_operations())
            .all(|op| !matches!(op, Operation::AlterColumn { .. })));
        assert!(plan.notices.contains(&Notice::TableUnchanged {
            table: "products".to_string()
        }));
    }

    #[test]
    fn test_junction_candidates_skip_malformed_pairs() {
        let declaration = product()
            .relationship(RelationshipSpec::ManyToMany(ManyToMany::new("products", "")));

        assert_eq!(reconciler().junction_candidates(&declaration), vec!["product_tag"]);
    }
}
