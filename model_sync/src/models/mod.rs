//! Models module for ModelSync
//!
//! This module handles entity declarations: the [`Entity`] trait implemented by
//! `#[derive(Entity)]` and the registry that discovers declaration files.

pub mod registry;

use crate::schema::types::{AbstractType, EntityDeclaration};

// Re-export key types
pub use registry::DeclarationRegistry;

/// A Rust type that declares the desired state of a table
pub trait Entity {
    /// The declaration used for reconciliation
    fn declaration() -> EntityDeclaration;
}

/// Abstract type and nullability for a Rust field type
///
/// Accepts the text `stringify!` produces, so `Option < String >` works as well as
/// `Option<String>`. Unrecognized types come back as [`AbstractType::Other`].
pub fn infer_field_type(rust_type: &str) -> (AbstractType, bool) {
    let compact: String = rust_type.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some(inner) = compact
        .strip_prefix("Option<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return (infer_field_type(inner).0, true);
    }

    // Last path segment: `chrono::NaiveDate` -> `NaiveDate`
    let base = compact.split('<').next().unwrap_or(&compact);
    let base = base.rsplit("::").next().unwrap_or(base);

    let abstract_type = match base {
        "String" | "&str" | "&'staticstr" => AbstractType::String,
        "i8" | "i16" | "i32" | "u8" | "u16" | "u32" => AbstractType::Integer,
        "i64" | "isize" => AbstractType::BigInteger,
        "u64" | "usize" => AbstractType::UnsignedBigInteger,
        "f32" | "f64" => AbstractType::Float,
        "bool" => AbstractType::Boolean,
        "NaiveDate" => AbstractType::Date,
        "DateTime" | "NaiveDateTime" => AbstractType::Timestamp,
        "Uuid" => AbstractType::Uuid,
        "Decimal" | "BigDecimal" => AbstractType::Decimal,
        "Value" | "Json" => AbstractType::Json,
        _ => AbstractType::Other(compact.clone()),
    };

    (abstract_type, false)
}
