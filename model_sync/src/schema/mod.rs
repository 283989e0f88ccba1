//! Schema module for ModelSync
//!
//! This module holds the reconciliation engine (normalization, column reconciliation,
//! relationship resolution, junction planning and unit emission) together with live
//! schema introspection and SQL rendering.

pub mod analyzer;
pub mod diff;
pub mod emitter;
pub mod generator;
pub mod normalize;
pub mod operations;
pub mod pivot;
pub mod reconciler;
pub mod relationships;
pub mod types;

// Re-export key types
pub use analyzer::{Introspector, MemorySchema, SqlIntrospector};
pub use diff::ColumnClassification;
pub use generator::{Dialect, MigrationRenderer, RenderedMigration};
pub use normalize::TypeNormalizer;
pub use operations::{Guard, GuardedOperation, MigrationUnit, Operation, TableExtras, UnitKind};
pub use reconciler::{Notice, Plan, ReconcileOptions, Reconciler, UnitFailure};
pub use types::{
    AbstractType, DefaultValue, EntityDeclaration, FieldSpec, IndexKind, LiveColumn, LiveIndex,
    LiveIndexSet, ManyToMany, OnDelete, RelationshipSpec, SingleReference, TableSnapshot,
};
