//! Column reconciliation
//!
//! This module compares declared fields against live columns and classifies each
//! declared field as absent, divergent or satisfied. Live columns that are no longer
//! declared are ignored; they are never scheduled for removal.

use indexmap::IndexMap;

use crate::schema::normalize::TypeNormalizer;
use crate::schema::types::{AbstractType, DefaultValue, FieldSpec, LiveColumn};

/// Classification of every declared field of one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnClassification {
    /// Declared fields with no live column
    pub absent: Vec<FieldSpec>,
    /// Declared fields whose live column differs in type, nullability or default
    pub divergent: Vec<FieldSpec>,
    /// Names of declared fields already matching their live column
    pub satisfied: Vec<String>,
}

impl ColumnClassification {
    /// True when no column needs to be created or altered
    pub fn is_empty(&self) -> bool {
        self.absent.is_empty() && self.divergent.is_empty()
    }
}

/// Classify declared fields against live columns, in declaration order
pub fn reconcile(
    declared: &[FieldSpec],
    live: &[LiveColumn],
    normalizer: &TypeNormalizer,
) -> ColumnClassification {
    // Map columns by name for easier comparison
    let live_columns: IndexMap<&str, &LiveColumn> =
        live.iter().map(|col| (col.name.as_str(), col)).collect();

    let mut classification = ColumnClassification::default();

    for field in declared {
        match live_columns.get(field.name.as_str()) {
            None => classification.absent.push(field.clone()),
            Some(current) => {
                if column_matches(field, current, normalizer) {
                    classification.satisfied.push(field.name.clone());
                } else {
                    tracing::debug!(
                        column = %field.name,
                        live_type = %current.native_type,
                        declared_type = %field.field_type,
                        "Column differs from declaration"
                    );
                    classification.divergent.push(field.clone());
                }
            }
        }
    }

    classification
}

/// Check whether a live column already has the declared shape
pub fn column_matches(field: &FieldSpec, current: &LiveColumn, normalizer: &TypeNormalizer) -> bool {
    // Type different
    if !types_match(&field.field_type, &normalizer.normalize(&current.native_type)) {
        return false;
    }

    // Nullability different
    if field.nullable != current.nullable {
        return false;
    }

    // Default value different
    defaults_match(field.default.as_ref(), current.default.as_deref())
}

/// Compare a declared type with a normalized live type
fn types_match(declared: &AbstractType, live: &AbstractType) -> bool {
    match (declared, live) {
        // Catalogs report both as bigint
        (AbstractType::BigInteger, AbstractType::UnsignedBigInteger) => true,
        _ => declared == live,
    }
}

/// Loose comparison between a declared default and the raw default a catalog reports
pub fn defaults_match(declared: Option<&DefaultValue>, live: Option<&str>) -> bool {
    let live = live.map(strip_default).filter(|raw| !raw.eq_ignore_ascii_case("null"));

    match (declared, live) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(declared), Some(raw)) => match declared {
            DefaultValue::Bool(expected) => match raw.to_lowercase().as_str() {
                "1" | "true" | "t" | "b'1'" => *expected,
                "0" | "false" | "f" | "b'0'" => !*expected,
                _ => false,
            },
            DefaultValue::Integer(expected) => raw
                .parse::<f64>()
                .map(|value| value == *expected as f64)
                .unwrap_or(false),
            DefaultValue::Float(expected) => raw
                .parse::<f64>()
                .map(|value| value == *expected)
                .unwrap_or(false),
            DefaultValue::Text(expected) => raw == *expected,
        },
    }
}

/// Strip casts, wrapping parentheses and quotes from a catalog default
///
/// `('draft'::character varying)` -> `draft`
fn strip_default(raw: &str) -> String {
    let mut value = raw.trim();

    while value.len() >= 2 && value.starts_with('(') && value.ends_with(')') {
        value = value[1..value.len() - 1].trim();
    }

    // Drop a trailing postgres cast, but not one inside a quoted literal
    if let Some(pos) = value.rfind("::") {
        let quotes_before = value[..pos].matches('\'').count();
        if quotes_before % 2 == 0 {
            value = value[..pos].trim();
        }
    }

    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].replace("''", "'");
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("name", AbstractType::String).length(255).nullable(true),
            FieldSpec::new("price", AbstractType::Integer).nullable(true),
            FieldSpec::new("status", AbstractType::String)
                .default_value(DefaultValue::Text("draft".to_string())),
        ]
    }

    #[test]
    fn test_absent_divergent_satisfied() {
        let live = vec![
            LiveColumn::new("id", "bigint"),
            // Types match, nullability differs
            LiveColumn::new("name", "varchar").nullable(false),
            LiveColumn::new("status", "character varying").default("'draft'::character varying"),
        ];

        let classification = reconcile(&fields(), &live, &TypeNormalizer::new());

        assert_eq!(classification.absent.len(), 1);
        assert_eq!(classification.absent[0].name, "price");
        assert_eq!(classification.divergent.len(), 1);
        assert_eq!(classification.divergent[0].name, "name");
        assert_eq!(classification.satisfied, vec!["status".to_string()]);
        assert!(!classification.is_empty());
    }

    #[test]
    fn test_matching_columns_are_satisfied() {
        let live = vec![
            LiveColumn::new("name", "varchar(255)").nullable(true),
            LiveColumn::new("price", "int").nullable(true),
            LiveColumn::new("status", "varchar").default("draft"),
        ];

        let classification = reconcile(&fields(), &live, &TypeNormalizer::new());

        assert!(classification.is_empty());
        assert_eq!(classification.satisfied, vec!["name", "price", "status"]);
    }

    #[test]
    fn test_type_change_is_divergent() {
        let live = vec![LiveColumn::new("price", "varchar").nullable(true)];
        let declared = vec![FieldSpec::new("price", AbstractType::Integer).nullable(true)];

        let classification = reconcile(&declared, &live, &TypeNormalizer::new());
        assert_eq!(classification.divergent, declared);
    }

    #[test]
    fn test_unknown_native_type_is_always_divergent() {
        let live = vec![LiveColumn::new("shape", "geometry")];
        let declared = vec![FieldSpec::new("shape", AbstractType::from("geometry2d"))];

        let classification = reconcile(&declared, &live, &TypeNormalizer::new());
        assert_eq!(classification.divergent.len(), 1);
    }

    #[test]
    fn test_undeclared_live_columns_are_ignored() {
        let live = vec![
            LiveColumn::new("price", "int").nullable(true),
            LiveColumn::new("legacy_code", "varchar"),
        ];
        let declared = vec![FieldSpec::new("price", AbstractType::Integer).nullable(true)];

        let classification = reconcile(&declared, &live, &TypeNormalizer::new());
        assert!(classification.is_empty());
        assert_eq!(classification.satisfied, vec!["price"]);
    }

    #[test]
    fn test_declared_big_integer_accepts_bigint() {
        let live = vec![LiveColumn::new("views", "bigint")];
        let declared = vec![FieldSpec::new("views", AbstractType::BigInteger)];

        assert!(reconcile(&declared, &live, &TypeNormalizer::new()).is_empty());
    }

    #[rstest]
    #[case(None, None, true)]
    #[case(None, Some("NULL"), true)]
    #[case(None, Some("0"), false)]
    #[case(Some(DefaultValue::Integer(0)), None, false)]
    #[case(Some(DefaultValue::Integer(10)), Some("10"), true)]
    #[case(Some(DefaultValue::Integer(10)), Some("'10'"), true)]
    #[case(Some(DefaultValue::Float(1.5)), Some("1.50"), true)]
    #[case(Some(DefaultValue::Bool(true)), Some("1"), true)]
    #[case(Some(DefaultValue::Bool(false)), Some("false"), true)]
    #[case(Some(DefaultValue::Bool(true)), Some("0"), false)]
    #[case(Some(DefaultValue::Text("it's".to_string())), Some("'it''s'::text"), true)]
    #[case(Some(DefaultValue::Text("a::b".to_string())), Some("'a::b'"), true)]
    #[case(Some(DefaultValue::Text("draft".to_string())), Some("('draft'::character varying)"), true)]
    #[case(Some(DefaultValue::Text("draft".to_string())), Some("published"), false)]
    fn test_loose_default_comparison(
        #[case] declared: Option<DefaultValue>,
        #[case] live: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(defaults_match(declared.as_ref(), live), expected);
    }
}
