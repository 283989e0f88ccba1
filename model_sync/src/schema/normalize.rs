//! Native type normalization
//!
//! Maps the type names a database catalog reports onto the abstract types used in
//! declarations so both sides of a comparison speak the same vocabulary. Names the
//! table does not know are passed through unchanged as [`AbstractType::Other`]; such
//! columns will compare as changed against any declared type they do not match
//! textually.

use std::collections::HashMap;

use crate::config::TypeMappingConfig;
use crate::schema::types::AbstractType;

/// Native type name normalizer
#[derive(Debug, Clone, Default)]
pub struct TypeNormalizer {
    overrides: HashMap<String, AbstractType>,
}

impl TypeNormalizer {
    /// Create a normalizer using only the built-in table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a normalizer with configured overrides
    pub fn from_config(config: &TypeMappingConfig) -> Self {
        let overrides = config
            .overrides
            .iter()
            .map(|(native, abstract_name)| {
                (native.to_lowercase(), AbstractType::from(abstract_name.as_str()))
            })
            .collect();

        Self { overrides }
    }

    /// Map a native type name to its abstract type
    pub fn normalize(&self, native: &str) -> AbstractType {
        let key = base_type_name(native);

        if let Some(mapped) = self.overrides.get(&key) {
            return mapped.clone();
        }

        if let Some(mapped) = builtin(&key) {
            return mapped;
        }

        // MySQL reports e.g. "bigint unsigned" in COLUMN_TYPE
        if let Some(signed) = key.strip_suffix(" unsigned") {
            if let Some(mapped) = builtin(signed) {
                return mapped;
            }
        }

        AbstractType::Other(native.to_string())
    }
}

/// Map a native type name with the built-in table only
pub fn normalize(native: &str) -> AbstractType {
    TypeNormalizer::new().normalize(native)
}

/// Lowercased name without a size suffix: `VARCHAR(255)` -> `varchar`
fn base_type_name(native: &str) -> String {
    let lowered = native.trim().to_lowercase();

    match lowered.find('(') {
        Some(start) => {
            let tail = lowered[start..]
                .find(')')
                .map(|end| lowered[start + end + 1..].trim().to_string())
                .unwrap_or_default();
            let head = lowered[..start].trim();
            if tail.is_empty() {
                head.to_string()
            } else {
                format!("{} {}", head, tail)
            }
        }
        None => lowered,
    }
}

fn builtin(name: &str) -> Option<AbstractType> {
    let mapped = match name {
        "int" | "integer" | "int4" | "smallint" | "int2" | "mediumint" => AbstractType::Integer,
        "varchar" | "character varying" | "char" | "character" | "string" => AbstractType::String,
        "text" | "mediumtext" | "longtext" | "tinytext" => AbstractType::Text,
        "bigint" | "int8" | "bigserial" | "unsigned big int" => AbstractType::UnsignedBigInteger,
        "tinyint" | "bool" | "boolean" | "bit" => AbstractType::Boolean,
        "json" | "jsonb" => AbstractType::Json,
        "double" | "double precision" | "float" | "float4" | "float8" | "real" => AbstractType::Float,
        "decimal" | "numeric" => AbstractType::Decimal,
        "date" => AbstractType::Date,
        "timestamp"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "timestamptz"
        | "datetime" => AbstractType::Timestamp,
        "uuid" => AbstractType::Uuid,
        _ => return None,
    };

    Some(mapped)
}

/// Canonical native name for an abstract type, the inverse of [`normalize`]
pub fn native_name(abstract_type: &AbstractType) -> String {
    let name = match abstract_type {
        AbstractType::String => "varchar",
        AbstractType::Text => "text",
        AbstractType::Integer => "int",
        // No signed 64-bit entry in the table; both land on bigint
        AbstractType::BigInteger | AbstractType::UnsignedBigInteger => "bigint",
        AbstractType::Boolean => "tinyint",
        AbstractType::Json => "json",
        AbstractType::Float => "double",
        AbstractType::Decimal => "decimal",
        AbstractType::Date => "date",
        AbstractType::Timestamp => "timestamp",
        AbstractType::Uuid => "uuid",
        AbstractType::Other(name) => name,
    };

    name.to_string()
}
