//! Migration rendering
//!
//! This module turns migration units into dialect-specific SQL. Guards are rendered as
//! existence checks where the dialect supports them (`IF NOT EXISTS`, `IF EXISTS`, a
//! catalog lookup for constraints on PostgreSQL). Executing sinks resolve guards against
//! the live schema first and render the remaining operations with
//! [`MigrationRenderer::render_resolved`].

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::schema::operations::{
    Guard, GuardedOperation, JunctionColumn, MigrationUnit, Operation, TableExtras,
    IDENTITY_COLUMN,
};
use crate::schema::types::{AbstractType, FieldSpec, IndexKind, OnDelete, TableSnapshot};
use crate::utils::naming;

/// SQL dialect of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Dialect for a configured driver name
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::DatabaseError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }

    fn quote(&self, identifier: &str) -> String {
        naming::format_sql_identifier(identifier, self.name())
    }

    fn foreign_key_name(&self, table: &str, column: &str) -> String {
        naming::get_foreign_key_name(table, column, naming::get_max_identifier_length(self.name()))
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dialect::from_driver(s)
    }
}

/// SQL produced for one migration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMigration {
    pub name: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl RenderedMigration {
    /// Contents of a `.sql` migration file
    pub fn to_sql_file(&self) -> String {
        format!(
            "-- {}\n\n-- up\n{}\n\n-- down\n{}\n",
            self.name,
            self.up.join("\n"),
            self.down.join("\n")
        )
    }
}

/// Migration SQL renderer
pub struct MigrationRenderer {
    dialect: Dialect,
}

impl MigrationRenderer {
    /// Create a new renderer
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Render a unit with its guards
    pub fn render(&self, unit: &MigrationUnit) -> Result<RenderedMigration> {
        let mut up = Vec::new();
        for guarded in &unit.operations {
            up.extend(self.render_guarded(&unit.table, guarded)?);
        }

        // Only created tables can be rolled back
        let down = if unit.creates_table() {
            vec![format!("DROP TABLE IF EXISTS {};", self.dialect.quote(&unit.table))]
        } else {
            vec![format!("-- {} has no automatic rollback", unit.name)]
        };

        Ok(RenderedMigration {
            name: unit.name.clone(),
            up,
            down,
        })
    }

    /// Render operations whose guards were already resolved against `snapshot`
    ///
    /// Foreign keys are dropped by the constraint names the snapshot reports.
    pub fn render_resolved(
        &self,
        table: &str,
        operations: &[Operation],
        snapshot: &TableSnapshot,
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();

        for operation in operations {
            match operation {
                Operation::DropForeignKey { column } => {
                    let live: Vec<&str> = snapshot
                        .indexes
                        .iter()
                        .filter(|index| {
                            index.kind == IndexKind::Foreign && index.columns.iter().any(|c| c == column)
                        })
                        .map(|index| index.name.as_str())
                        .collect();

                    if live.is_empty() {
                        statements.extend(self.render_operation(table, operation)?);
                    } else {
                        for name in live {
                            statements.push(self.drop_constraint(table, name)?);
                        }
                    }
                }
                _ => statements.extend(self.render_operation(table, operation)?),
            }
        }

        Ok(statements)
    }

    /// Render one operation without existence checks
    pub fn render_operation(&self, table: &str, operation: &Operation) -> Result<Vec<String>> {
        let t = self.dialect.quote(table);

        match operation {
            Operation::CreateTable { fields, extras, .. } => {
                Ok(vec![self.create_table(table, fields, &[], extras, false)])
            }
            Operation::CreateJunctionTable {
                first,
                second,
                extras,
                ..
            } => Ok(vec![self.create_junction(table, first, second, extras, false)]),
            Operation::AddColumn { field } => Ok(vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                t,
                self.column_definition(field)
            )]),
            Operation::AlterColumn { field } => self.alter_column(table, field),
            Operation::AddForeignKey {
                column,
                references,
                on,
                on_delete,
            } => Ok(vec![self.add_foreign_key(table, column, references, on, *on_delete)?]),
            Operation::DropForeignKey { column } => {
                let name = self.dialect.foreign_key_name(table, column);
                Ok(vec![self.drop_constraint(table, &name)?])
            }
        }
    }

    fn render_guarded(&self, table: &str, guarded: &GuardedOperation) -> Result<Vec<String>> {
        match (&guarded.guard, &guarded.operation) {
            (Guard::TableExists, Operation::CreateTable { fields, extras, .. }) => {
                let mut statements = vec![self.create_table(table, fields, &[], extras, true)];

                // Merge columns into a table that already existed
                if self.dialect != Dialect::Sqlite {
                    let merged = fields.iter().cloned().chain(extras.bookkeeping_fields());
                    for field in merged {
                        statements.extend(self.add_column_if_missing(table, &field));
                    }
                }

                Ok(statements)
            }
            (Guard::TableExists, Operation::CreateJunctionTable { first, second, extras, .. }) => {
                Ok(vec![self.create_junction(table, first, second, extras, true)])
            }
            (Guard::ColumnExists | Guard::ColumnMissing, Operation::AddColumn { field }) => {
                match self.dialect {
                    // SQLite has no conditional DDL; the plan already checked the live table
                    Dialect::Sqlite => self.render_operation(table, &guarded.operation),
                    _ => Ok(self.add_column_if_missing(table, field)),
                }
            }
            (Guard::ForeignKeyPresent, Operation::DropForeignKey { column }) => {
                self.drop_foreign_keys_on(table, column)
            }
            (
                Guard::ForeignKeyMissing,
                Operation::AddForeignKey {
                    column,
                    references,
                    on,
                    on_delete,
                },
            ) => {
                let statement = self.add_foreign_key(table, column, references, on, *on_delete)?;
                match self.dialect {
                    Dialect::Postgres => Ok(vec![format!(
                        "DO $$\nBEGIN\n  IF NOT EXISTS ({}) THEN\n    {}\n  END IF;\nEND $$;",
                        pg_foreign_keys_on(table, column),
                        statement
                    )]),
                    _ => Ok(mysql_when_absent(
                        &mysql_foreign_key_count(table, column),
                        &statement,
                    )),
                }
            }
            (_, operation) => self.render_operation(table, operation),
        }
    }

    fn add_column_if_missing(&self, table: &str, field: &FieldSpec) -> Vec<String> {
        let t = self.dialect.quote(table);
        let statement = format!("ALTER TABLE {} ADD COLUMN {};", t, self.column_definition(field));

        match self.dialect {
            Dialect::Postgres => vec![format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                t,
                self.column_definition(field)
            )],
            Dialect::MySql => {
                let count = format!(
                    "SELECT COUNT(*) FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND COLUMN_NAME = {}",
                    sql_literal(table),
                    sql_literal(&field.name)
                );
                mysql_when_absent(&count, &statement)
            }
            Dialect::Sqlite => vec![statement],
        }
    }

    /// Drop every foreign key on `column`, whatever the constraint is called
    fn drop_foreign_keys_on(&self, table: &str, column: &str) -> Result<Vec<String>> {
        match self.dialect {
            Dialect::Postgres => Ok(vec![format!(
                "DO $$\nDECLARE\n  fk record;\nBEGIN\n  FOR fk IN {} LOOP\n    EXECUTE format('ALTER TABLE %I DROP CONSTRAINT %I', {}, fk.conname);\n  END LOOP;\nEND $$;",
                pg_foreign_keys_on(table, column),
                sql_literal(table)
            )]),
            Dialect::MySql => {
                let drops = format!(
                    "SELECT IFNULL(CONCAT({}, GROUP_CONCAT(DISTINCT CONCAT('DROP FOREIGN KEY `', CONSTRAINT_NAME, '`') SEPARATOR ', ')), 'SELECT 1') FROM information_schema.KEY_COLUMN_USAGE WHERE {}",
                    sql_literal(&format!("ALTER TABLE {} ", self.dialect.quote(table))),
                    mysql_foreign_key_filter(table, column)
                );
                Ok(mysql_prepared(&format!("({})", drops)))
            }
            Dialect::Sqlite => {
                let name = self.dialect.foreign_key_name(table, column);
                Ok(vec![self.drop_constraint(table, &name)?])
            }
        }
    }

    fn create_table(
        &self,
        table: &str,
        fields: &[FieldSpec],
        constraints: &[String],
        extras: &TableExtras,
        guarded: bool,
    ) -> String {
        let mut definitions = Vec::new();

        if extras.identity {
            definitions.push(self.identity_column());
        }
        definitions.extend(fields.iter().map(|field| self.column_definition(field)));
        definitions.extend(
            extras
                .bookkeeping_fields()
                .iter()
                .map(|field| self.column_definition(field)),
        );
        definitions.extend(constraints.iter().cloned());

        format!(
            "CREATE TABLE {}{} (\n  {}\n);",
            if guarded { "IF NOT EXISTS " } else { "" },
            self.dialect.quote(table),
            definitions.join(",\n  ")
        )
    }

    fn create_junction(
        &self,
        table: &str,
        first: &JunctionColumn,
        second: &JunctionColumn,
        extras: &TableExtras,
        guarded: bool,
    ) -> String {
        let columns: Vec<FieldSpec> = [first, second]
            .iter()
            .map(|junction| FieldSpec::new(&junction.column, AbstractType::UnsignedBigInteger))
            .collect();

        let constraints: Vec<String> = [first, second]
            .iter()
            .map(|junction| {
                format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                    self.dialect
                        .quote(&self.dialect.foreign_key_name(table, &junction.column)),
                    self.dialect.quote(&junction.column),
                    self.dialect.quote(&junction.on),
                    self.dialect.quote(&junction.references),
                    OnDelete::Cascade.as_sql()
                )
            })
            .collect();

        self.create_table(table, &columns, &constraints, extras, guarded)
    }

    fn identity_column(&self) -> String {
        let id = self.dialect.quote(IDENTITY_COLUMN);
        match self.dialect {
            Dialect::Postgres => format!("{} BIGSERIAL PRIMARY KEY", id),
            Dialect::MySql => format!("{} BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY", id),
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", id),
        }
    }

    fn column_definition(&self, field: &FieldSpec) -> String {
        let mut definition = format!(
            "{} {} {}",
            self.dialect.quote(&field.name),
            self.column_type(field),
            if field.nullable { "NULL" } else { "NOT NULL" }
        );

        if let Some(default) = &field.default {
            definition.push_str(&format!(" DEFAULT {}", default.to_sql_literal()));
        }

        definition
    }

    /// Native type used when creating or altering a column
    pub fn column_type(&self, field: &FieldSpec) -> String {
        let length = field.length.unwrap_or(255);

        match (&field.field_type, self.dialect) {
            (AbstractType::String, _) => format!("VARCHAR({})", length),
            (AbstractType::Text, _) => "TEXT".to_string(),
            (AbstractType::Integer, Dialect::MySql) => "INT".to_string(),
            (AbstractType::Integer, _) => "INTEGER".to_string(),
            (AbstractType::BigInteger, _) => "BIGINT".to_string(),
            (AbstractType::UnsignedBigInteger, Dialect::MySql) => "BIGINT UNSIGNED".to_string(),
            (AbstractType::UnsignedBigInteger, _) => "BIGINT".to_string(),
            (AbstractType::Boolean, Dialect::MySql) => "TINYINT(1)".to_string(),
            (AbstractType::Boolean, _) => "BOOLEAN".to_string(),
            (AbstractType::Json, Dialect::Postgres) => "JSONB".to_string(),
            (AbstractType::Json, _) => "JSON".to_string(),
            (AbstractType::Float, Dialect::Postgres) => "DOUBLE PRECISION".to_string(),
            (AbstractType::Float, _) => "DOUBLE".to_string(),
            (AbstractType::Decimal, _) => "DECIMAL(10, 2)".to_string(),
            (AbstractType::Date, _) => "DATE".to_string(),
            (AbstractType::Timestamp, Dialect::MySql) => "DATETIME".to_string(),
            (AbstractType::Timestamp, _) => "TIMESTAMP".to_string(),
            (AbstractType::Uuid, Dialect::MySql) => "CHAR(36)".to_string(),
            (AbstractType::Uuid, _) => "UUID".to_string(),
            (AbstractType::Other(name), _) => name.clone(),
        }
    }

    fn alter_column(&self, table: &str, field: &FieldSpec) -> Result<Vec<String>> {
        let t = self.dialect.quote(table);
        let c = self.dialect.quote(&field.name);

        match self.dialect {
            Dialect::Postgres => {
                let column_type = self.column_type(field);
                let mut statements = vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    t, c, column_type, c, column_type
                )];

                statements.push(if field.nullable {
                    format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;", t, c)
                } else {
                    format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", t, c)
                });

                statements.push(match &field.default {
                    Some(default) => format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                        t,
                        c,
                        default.to_sql_literal()
                    ),
                    None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;", t, c),
                });

                Ok(statements)
            }
            Dialect::MySql => Ok(vec![format!(
                "ALTER TABLE {} MODIFY COLUMN {};",
                t,
                self.column_definition(field)
            )]),
            Dialect::Sqlite => Err(Error::MigrationError(format!(
                "SQLite does not support altering column `{}` on `{}`; the table must be rebuilt",
                field.name, table
            ))),
        }
    }

    fn add_foreign_key(
        &self,
        table: &str,
        column: &str,
        references: &str,
        on: &str,
        on_delete: OnDelete,
    ) -> Result<String> {
        if self.dialect == Dialect::Sqlite {
            return Err(Error::MigrationError(format!(
                "SQLite does not support adding a foreign key on `{}`.`{}` to an existing table",
                table, column
            )));
        }

        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {};",
            self.dialect.quote(table),
            self.dialect.quote(&self.dialect.foreign_key_name(table, column)),
            self.dialect.quote(column),
            self.dialect.quote(on),
            self.dialect.quote(references),
            on_delete.as_sql()
        ))
    }

    fn drop_constraint(&self, table: &str, name: &str) -> Result<String> {
        let t = self.dialect.quote(table);
        let n = self.dialect.quote(name);

        match self.dialect {
            Dialect::Postgres => Ok(format!("ALTER TABLE {} DROP CONSTRAINT {};", t, n)),
            Dialect::MySql => Ok(format!("ALTER TABLE {} DROP FOREIGN KEY {};", t, n)),
            Dialect::Sqlite => Err(Error::MigrationError(format!(
                "SQLite does not support dropping foreign key `{}` from `{}`",
                name, table
            ))),
        }
    }
}

/// Quote `value` as a SQL string literal
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Foreign key constraints of `table` that include `column`
fn pg_foreign_keys_on(table: &str, column: &str) -> String {
    format!(
        "SELECT c.conname FROM pg_constraint c JOIN pg_class t ON t.oid = c.conrelid JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY (c.conkey) WHERE c.contype = 'f' AND pg_table_is_visible(t.oid) AND t.relname = {} AND a.attname = {}",
        sql_literal(table),
        sql_literal(column)
    )
}

fn mysql_foreign_key_filter(table: &str, column: &str) -> String {
    format!(
        "TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND COLUMN_NAME = {} AND REFERENCED_TABLE_NAME IS NOT NULL",
        sql_literal(table),
        sql_literal(column)
    )
}

fn mysql_foreign_key_count(table: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM information_schema.KEY_COLUMN_USAGE WHERE {}",
        mysql_foreign_key_filter(table, column)
    )
}

/// Run `statement` only when `count_query` counts no rows
fn mysql_when_absent(count_query: &str, statement: &str) -> Vec<String> {
    mysql_prepared(&format!(
        "IF(({}) = 0, {}, 'SELECT 1')",
        count_query,
        sql_literal(statement.trim_end_matches(';'))
    ))
}

/// Execute the statement text that `expression` evaluates to
fn mysql_prepared(expression: &str) -> Vec<String> {
    vec![
        format!("SET @model_sync_ddl = {};", expression),
        "PREPARE model_sync_stmt FROM @model_sync_ddl;".to_string(),
        "EXECUTE model_sync_stmt;".to_string(),
        "DEALLOCATE PREPARE model_sync_stmt;".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::normalize::{normalize, TypeNormalizer};
    use crate::schema::operations::UnitKind;
    use crate::schema::reconciler::{ReconcileOptions, Reconciler};
    use crate::schema::relationships::RelationshipResolver;
    use crate::schema::types::{
        DefaultValue, EntityDeclaration, LiveColumn, LiveIndex, LiveIndexSet, RelationshipSpec,
        SingleReference,
    };
    use chrono::Utc;
    use std::collections::HashSet;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn unit(kind: UnitKind, operations: Vec<GuardedOperation>) -> MigrationUnit {
        MigrationUnit {
            name: "create_products_table".to_string(),
            kind,
            table: "products".to_string(),
            operations,
            generated_at: Utc::now(),
            sequence: 1,
        }
    }

    fn create_products() -> GuardedOperation {
        GuardedOperation::new(
            Guard::TableExists,
            Operation::CreateTable {
                table: "products".to_string(),
                fields: vec![
                    FieldSpec::new("name", AbstractType::String).length(120).nullable(true),
                    FieldSpec::new("status", AbstractType::String)
                        .default_value(DefaultValue::Text("draft".to_string())),
                ],
                extras: TableExtras::default(),
            },
        )
    }

    fn add_brand_fk() -> GuardedOperation {
        GuardedOperation::new(
            Guard::ForeignKeyMissing,
            Operation::AddForeignKey {
                column: "brand_id".to_string(),
                references: "id".to_string(),
                on: "brands".to_string(),
                on_delete: OnDelete::SetNull,
            },
        )
    }

    #[test]
    fn test_create_table_postgres() {
        let rendered = MigrationRenderer::new(Dialect::Postgres)
            .render(&unit(UnitKind::Table, vec![create_products()]))
            .unwrap();

        assert!(rendered.up[0].starts_with("CREATE TABLE IF NOT EXISTS \"products\" ("));
        assert!(rendered.up[0].contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(rendered.up[0].contains("\"name\" VARCHAR(120) NULL"));
        assert!(rendered.up[0].contains("\"status\" VARCHAR(255) NOT NULL DEFAULT 'draft'"));
        assert!(rendered.up[0].contains("\"deleted_at\" TIMESTAMP NULL"));
        assert_eq!(rendered.down, vec!["DROP TABLE IF EXISTS \"products\";"]);
    }

    #[test]
    fn test_create_table_mysql() {
        let rendered = MigrationRenderer::new(Dialect::MySql)
            .render(&unit(UnitKind::Table, vec![create_products()]))
            .unwrap();

        assert!(rendered.up[0].starts_with("CREATE TABLE IF NOT EXISTS `products` ("));
        assert!(rendered.up[0].contains("`id` BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY"));
        // Two declared fields and three bookkeeping columns merged into an existing table
        assert_eq!(rendered.up.len(), 1 + 5 * 4);
        assert!(rendered.up[1].contains("COLUMN_NAME = 'name'"));
    }

    #[test]
    fn test_foreign_key_is_guarded_on_postgres() {
        let rendered = MigrationRenderer::new(Dialect::Postgres)
            .render(&unit(UnitKind::ForeignKeys, vec![add_brand_fk()]))
            .unwrap();

        assert!(rendered.up[0].starts_with("DO $$"));
        assert!(rendered.up[0].contains("IF NOT EXISTS (SELECT c.conname FROM pg_constraint c"));
        assert!(rendered.up[0].contains("t.relname = 'products' AND a.attname = 'brand_id'"));
        assert!(rendered.up[0].contains("ON DELETE SET NULL"));
        assert!(rendered.down[0].starts_with("--"));
    }

    #[test]
    fn test_postgres_drop_finds_constraints_by_column() {
        // The live constraint carries the server's default name, not ours
        let snapshot = TableSnapshot::existing(
            "products",
            vec![LiveColumn::new("brand_id", "bigint").nullable(true)],
            vec![LiveIndex::new("products_brand_id_fkey", &["brand_id"], IndexKind::Foreign)]
                .into_iter()
                .collect::<LiveIndexSet>(),
        );
        let normalizer = TypeNormalizer::new();
        let resolved = RelationshipResolver::new(&normalizer, false)
            .resolve(
                "Product",
                &[RelationshipSpec::BelongsTo(
                    SingleReference::new("brand_id", "brands").on_delete(OnDelete::SetNull),
                )],
                &snapshot,
            )
            .unwrap();

        let rendered = MigrationRenderer::new(Dialect::Postgres)
            .render(&unit(UnitKind::ForeignKeys, resolved.constraint_ops))
            .unwrap();

        assert_eq!(rendered.up.len(), 2);
        assert!(rendered.up[0].contains("FOR fk IN SELECT c.conname FROM pg_constraint c"));
        assert!(rendered.up[0].contains("c.contype = 'f'"));
        assert!(rendered.up[0].contains(
            "EXECUTE format('ALTER TABLE %I DROP CONSTRAINT %I', 'products', fk.conname);"
        ));
        assert!(!rendered.up[0].contains("products_brand_id_foreign"));
        assert!(rendered.up[1].contains("ADD CONSTRAINT \"products_brand_id_foreign\""));
    }

    #[test]
    fn test_mysql_foreign_keys_are_guarded() {
        let drop = GuardedOperation::new(
            Guard::ForeignKeyPresent,
            Operation::DropForeignKey {
                column: "brand_id".to_string(),
            },
        );

        let rendered = MigrationRenderer::new(Dialect::MySql)
            .render(&unit(UnitKind::ForeignKeys, vec![drop, add_brand_fk()]))
            .unwrap();

        assert_eq!(rendered.up.len(), 8);
        assert!(rendered.up[0].contains(
            "GROUP_CONCAT(DISTINCT CONCAT('DROP FOREIGN KEY `', CONSTRAINT_NAME, '`') SEPARATOR ', ')"
        ));
        assert!(rendered.up[0]
            .contains("COLUMN_NAME = 'brand_id' AND REFERENCED_TABLE_NAME IS NOT NULL"));
        assert!(rendered.up[4].starts_with(
            "SET @model_sync_ddl = IF((SELECT COUNT(*) FROM information_schema.KEY_COLUMN_USAGE"
        ));
        assert!(rendered.up[4]
            .contains("'ALTER TABLE `products` ADD CONSTRAINT `products_brand_id_foreign`"));
        assert_eq!(rendered.up[6], "EXECUTE model_sync_stmt;");
    }

    #[test]
    fn test_mysql_column_additions_are_guarded() {
        let add = GuardedOperation::new(
            Guard::ColumnMissing,
            Operation::AddColumn {
                field: FieldSpec::new("status", AbstractType::String)
                    .default_value(DefaultValue::Text("it's new".to_string())),
            },
        );

        let rendered = MigrationRenderer::new(Dialect::MySql)
            .render(&unit(UnitKind::Table, vec![add]))
            .unwrap();

        assert_eq!(
            rendered.up,
            vec![
                "SET @model_sync_ddl = IF((SELECT COUNT(*) FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 'products' AND COLUMN_NAME = 'status') = 0, 'ALTER TABLE `products` ADD COLUMN `status` VARCHAR(255) NOT NULL DEFAULT ''it''''s new''', 'SELECT 1');",
                "PREPARE model_sync_stmt FROM @model_sync_ddl;",
                "EXECUTE model_sync_stmt;",
                "DEALLOCATE PREPARE model_sync_stmt;",
            ]
        );
    }

    #[test]
    fn test_sqlite_update_skips_existing_bookkeeping() {
        let declaration = EntityDeclaration::new("Product")
            .field(FieldSpec::new("name", AbstractType::String).length(255).nullable(true))
            .field(FieldSpec::new("price", AbstractType::Integer).nullable(true));
        let snapshot = TableSnapshot::existing(
            "products",
            vec![
                LiveColumn::new("id", "integer"),
                LiveColumn::new("name", "varchar(255)").nullable(true),
                LiveColumn::new("created_at", "timestamp").nullable(true),
                LiveColumn::new("updated_at", "timestamp").nullable(true),
                LiveColumn::new("deleted_at", "timestamp").nullable(true),
            ],
            LiveIndexSet::default(),
        );

        let plan = Reconciler::new(TypeNormalizer::new(), ReconcileOptions::default())
            .plan(&declaration, &snapshot, &HashSet::new(), Utc::now())
            .unwrap();
        let rendered = MigrationRenderer::new(Dialect::Sqlite)
            .render(&plan.units[0])
            .unwrap();

        assert_eq!(
            rendered.up,
            vec!["ALTER TABLE \"products\" ADD COLUMN \"price\" INTEGER NULL;"]
        );
    }

    #[test]
    fn test_sqlite_rejects_foreign_keys_on_existing_tables() {
        let err = MigrationRenderer::new(Dialect::Sqlite)
            .render(&unit(UnitKind::ForeignKeys, vec![add_brand_fk()]))
            .unwrap_err();

        assert!(matches!(err, Error::MigrationError(_)));
    }

    #[test]
    fn test_alter_column_postgres() {
        let statements = MigrationRenderer::new(Dialect::Postgres)
            .render_operation(
                "products",
                &Operation::AlterColumn {
                    field: FieldSpec::new("brand_id", AbstractType::UnsignedBigInteger).nullable(true),
                },
            )
            .unwrap();

        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"products\" ALTER COLUMN \"brand_id\" TYPE BIGINT USING \"brand_id\"::BIGINT;",
                "ALTER TABLE \"products\" ALTER COLUMN \"brand_id\" DROP NOT NULL;",
                "ALTER TABLE \"products\" ALTER COLUMN \"brand_id\" DROP DEFAULT;",
            ]
        );
    }

    #[test]
    fn test_resolved_drop_uses_live_constraint_name() {
        let snapshot = TableSnapshot::existing(
            "products",
            vec![],
            vec![LiveIndex::new("fk_legacy_brand", &["brand_id"], IndexKind::Foreign)]
                .into_iter()
                .collect::<LiveIndexSet>(),
        );

        let statements = MigrationRenderer::new(Dialect::MySql)
            .render_resolved(
                "products",
                &[Operation::DropForeignKey {
                    column: "brand_id".to_string(),
                }],
                &snapshot,
            )
            .unwrap();

        assert_eq!(statements, vec!["ALTER TABLE `products` DROP FOREIGN KEY `fk_legacy_brand`;"]);
    }

    #[test]
    fn test_junction_table_has_cascading_keys() {
        let op = Operation::CreateJunctionTable {
            table: "product_tag".to_string(),
            first: JunctionColumn {
                column: "product_id".to_string(),
                references: "id".to_string(),
                on: "products".to_string(),
            },
            second: JunctionColumn {
                column: "tag_id".to_string(),
                references: "id".to_string(),
                on: "tags".to_string(),
            },
            extras: TableExtras::default(),
        };

        let statements = MigrationRenderer::new(Dialect::Sqlite)
            .render_operation("product_tag", &op)
            .unwrap();

        assert!(statements[0].contains("\"product_id\" BIGINT NOT NULL"));
        assert!(statements[0].contains(
            "FOREIGN KEY (\"tag_id\") REFERENCES \"tags\" (\"id\") ON DELETE CASCADE"
        ));
    }

    #[rstest]
    #[case(AbstractType::String)]
    #[case(AbstractType::Text)]
    #[case(AbstractType::Integer)]
    #[case(AbstractType::UnsignedBigInteger)]
    #[case(AbstractType::Boolean)]
    #[case(AbstractType::Json)]
    #[case(AbstractType::Float)]
    #[case(AbstractType::Decimal)]
    #[case(AbstractType::Date)]
    #[case(AbstractType::Timestamp)]
    #[case(AbstractType::Uuid)]
    fn test_sqlite_types_normalize_back(#[case] abstract_type: AbstractType) {
        let renderer = MigrationRenderer::new(Dialect::Sqlite);
        let native = renderer.column_type(&FieldSpec::new("c", abstract_type.clone()));

        assert_eq!(normalize(&native), abstract_type);
    }

    #[test]
    fn test_unknown_driver() {
        assert!(Dialect::from_driver("oracle").is_err());
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
    }
}
