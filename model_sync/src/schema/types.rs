//! Type definitions for declared and live schema objects

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::naming;

/// Abstract field type used in entity declarations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AbstractType {
    /// Short, length-limited text
    #[default]
    String,
    /// Unbounded text
    Text,
    Integer,
    BigInteger,
    UnsignedBigInteger,
    Boolean,
    Json,
    Float,
    Decimal,
    Date,
    Timestamp,
    Uuid,
    /// Anything without an entry in the vocabulary, kept verbatim
    Other(String),
}

impl AbstractType {
    /// The declaration name of this type
    pub fn name(&self) -> &str {
        match self {
            AbstractType::String => "string",
            AbstractType::Text => "text",
            AbstractType::Integer => "integer",
            AbstractType::BigInteger => "bigInteger",
            AbstractType::UnsignedBigInteger => "unsignedBigInteger",
            AbstractType::Boolean => "boolean",
            AbstractType::Json => "json",
            AbstractType::Float => "float",
            AbstractType::Decimal => "decimal",
            AbstractType::Date => "date",
            AbstractType::Timestamp => "timestamp",
            AbstractType::Uuid => "uuid",
            AbstractType::Other(name) => name,
        }
    }

    /// Whether this type fell outside the known vocabulary
    pub fn is_unknown(&self) -> bool {
        matches!(self, AbstractType::Other(_))
    }
}

impl FromStr for AbstractType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "string" => AbstractType::String,
            "text" => AbstractType::Text,
            "integer" => AbstractType::Integer,
            "bigInteger" => AbstractType::BigInteger,
            "unsignedBigInteger" => AbstractType::UnsignedBigInteger,
            "boolean" => AbstractType::Boolean,
            "json" => AbstractType::Json,
            "float" => AbstractType::Float,
            "decimal" => AbstractType::Decimal,
            "date" => AbstractType::Date,
            "timestamp" => AbstractType::Timestamp,
            "uuid" => AbstractType::Uuid,
            other => AbstractType::Other(other.to_string()),
        })
    }
}

impl From<String> for AbstractType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for AbstractType {
    fn from(value: &str) -> Self {
        AbstractType::from(value.to_string())
    }
}

impl From<AbstractType> for String {
    fn from(value: AbstractType) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar default value from a declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DefaultValue {
    /// Render the value as a SQL literal
    pub fn to_sql_literal(&self) -> String {
        match self {
            DefaultValue::Bool(b) => b.to_string(),
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

/// Represents a field declared on an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: AbstractType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

impl FieldSpec {
    /// Create a new non-nullable field with the given name and type
    pub fn new(name: &str, field_type: AbstractType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            length: None,
            nullable: false,
            default: None,
        }
    }

    /// Set the length of the field
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set whether the field is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set a default value for the field
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Represents a column as reported by introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub native_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl LiveColumn {
    /// Create a new non-nullable column with the given native type
    pub fn new(name: &str, native_type: &str) -> Self {
        Self {
            name: name.to_string(),
            native_type: native_type.to_string(),
            nullable: false,
            default: None,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set the raw default reported for the column
    pub fn default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Referential action applied when the referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OnDelete {
    #[default]
    #[serde(rename = "restrict")]
    Restrict,
    #[serde(rename = "cascade")]
    Cascade,
    #[serde(rename = "set null", alias = "set-null", alias = "set_null")]
    SetNull,
}

impl OnDelete {
    /// SQL spelling of the action
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnDelete::Restrict => f.write_str("restrict"),
            OnDelete::Cascade => f.write_str("cascade"),
            OnDelete::SetNull => f.write_str("set null"),
        }
    }
}

fn default_reference_key() -> String {
    "id".to_string()
}

/// A belongs-to style foreign key declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleReference {
    /// Local column; strict references may leave it out
    #[serde(default)]
    pub column: Option<String>,
    /// Referenced table
    #[serde(default)]
    pub table: Option<String>,
    /// Referenced entity, used to derive the table when `table` is absent
    #[serde(default)]
    pub entity: Option<String>,
    /// Referenced key column
    #[serde(default = "default_reference_key")]
    pub field: String,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default)]
    pub strict: bool,
}

impl SingleReference {
    /// A loose reference from `column` to `table.id`
    pub fn new(column: &str, table: &str) -> Self {
        Self {
            column: Some(column.to_string()),
            table: Some(table.to_string()),
            entity: None,
            field: default_reference_key(),
            on_delete: OnDelete::default(),
            strict: false,
        }
    }

    /// Set the referenced key column
    pub fn references(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }

    /// Set the on-delete policy
    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Mark the reference as strict
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// A many-to-many association between two tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToMany {
    pub table1: String,
    pub table2: String,
}

impl ManyToMany {
    pub fn new(table1: &str, table2: &str) -> Self {
        Self {
            table1: table1.to_string(),
            table2: table2.to_string(),
        }
    }
}

/// Represents a relationship declared on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelationshipSpec {
    #[serde(rename = "belongsTo")]
    BelongsTo(SingleReference),
    #[serde(rename = "manyToMany")]
    ManyToMany(ManyToMany),
}

impl RelationshipSpec {
    /// Short human-readable label used in errors and logs
    pub fn label(&self) -> String {
        match self {
            RelationshipSpec::BelongsTo(reference) => format!(
                "belongsTo({} -> {})",
                reference.column.as_deref().unwrap_or("?"),
                reference
                    .table
                    .as_deref()
                    .or(reference.entity.as_deref())
                    .unwrap_or("?")
            ),
            RelationshipSpec::ManyToMany(m2m) => {
                format!("manyToMany({}, {})", m2m.table1, m2m.table2)
            }
        }
    }
}

/// Kind of an introspected index or constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Unique,
    #[default]
    Index,
    Foreign,
}

/// Represents an index or constraint as reported by introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveIndex {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub kind: IndexKind,
}

impl LiveIndex {
    pub fn new(name: &str, columns: &[&str], kind: IndexKind) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            kind,
        }
    }
}

/// All indexes and constraints of one table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveIndexSet(pub Vec<LiveIndex>);

impl LiveIndexSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add an index to the set
    pub fn push(&mut self, index: LiveIndex) {
        self.0.push(index);
    }

    /// Whether any index covers `column`
    pub fn covers(&self, column: &str) -> bool {
        self.0
            .iter()
            .any(|index| index.columns.iter().any(|c| c == column))
    }

    /// Whether a foreign key constraint covers `column`
    pub fn has_foreign_key_on(&self, column: &str) -> bool {
        self.0.iter().any(|index| {
            index.kind == IndexKind::Foreign && index.columns.iter().any(|c| c == column)
        })
    }

    /// Remove every foreign key constraint covering `column`
    pub fn remove_foreign_keys_on(&mut self, column: &str) {
        self.0.retain(|index| {
            !(index.kind == IndexKind::Foreign && index.columns.iter().any(|c| c == column))
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveIndex> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<LiveIndex> for LiveIndexSet {
    fn from_iter<I: IntoIterator<Item = LiveIndex>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything introspection reports about one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table: String,
    pub exists: bool,
    #[serde(default)]
    pub columns: Vec<LiveColumn>,
    #[serde(default)]
    pub indexes: LiveIndexSet,
}

impl TableSnapshot {
    /// Snapshot of a table that does not exist
    pub fn missing(table: &str) -> Self {
        Self {
            table: table.to_string(),
            exists: false,
            columns: Vec::new(),
            indexes: LiveIndexSet::new(),
        }
    }

    /// Snapshot of an existing table
    pub fn existing(table: &str, columns: Vec<LiveColumn>, indexes: LiveIndexSet) -> Self {
        Self {
            table: table.to_string(),
            exists: true,
            columns,
            indexes,
        }
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// The desired state of one entity's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

impl EntityDeclaration {
    /// Create an empty declaration for `name`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Override the derived table name
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Add a field to the declaration
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a relationship to the declaration
    pub fn relationship(mut self, relationship: RelationshipSpec) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Target table: explicit, or the plural snake case of the entity name
    pub fn table_name(&self) -> String {
        match &self.table {
            Some(table) if !table.trim().is_empty() => table.clone(),
            _ => naming::get_table_name(&self.name, "snake_case", true),
        }
    }

    /// Check the declaration is usable for a reconciliation run
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::EmptySchema(self.name.clone()));
        }

        let table = self.table_name();
        if !naming::is_valid_identifier(&table) {
            return Err(Error::ValidationError(format!(
                "Entity `{}` maps to invalid table name `{}`",
                self.name, table
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(Error::ValidationError(format!(
                    "Entity `{}` declares a field without a name",
                    self.name
                )));
            }
            if !naming::is_valid_identifier(&field.name) {
                return Err(Error::ValidationError(format!(
                    "Entity `{}` declares invalid field name `{}`",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::ValidationError(format!(
                    "Entity `{}` declares field `{}` more than once",
                    self.name, field.name
                )));
            }
        }

        Ok(())
    }
}
