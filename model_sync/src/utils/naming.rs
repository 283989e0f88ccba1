//! Naming utilities for ModelSync
//!
//! This module provides utilities for naming conventions and transformations.

use inflector::Inflector;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Apply a naming convention to a string
pub fn apply_naming_convention(name: &str, convention: &str) -> String {
    match convention {
        "snake_case" => name.to_snake_case(),
        "camel_case" => name.to_camel_case(),
        "pascal_case" => name.to_pascal_case(),
        _ => name.to_string(),
    }
}

/// Format a name according to a pattern with placeholders
pub fn format_name(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = pattern.to_string();

    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{}}}", placeholder), value);
    }

    result
}

/// Get table name from an entity name according to convention
pub fn get_table_name(entity_name: &str, style: &str, pluralize_name: bool) -> String {
    let name = apply_naming_convention(entity_name, style);

    if pluralize_name {
        pluralize(&name)
    } else {
        name
    }
}

/// Name of the constraint backing a foreign key on `table.column`
pub fn get_foreign_key_name(table_name: &str, column_name: &str, max_length: usize) -> String {
    let name = format_name(
        "{table}_{column}_foreign",
        &[("table", table_name), ("column", column_name)],
    );

    truncate_identifier(&name, max_length)
}

/// Whether `name` can be used as an unquoted SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Truncate an identifier to fit database limits
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    if name.len() <= max_length {
        name.to_string()
    } else {
        // "_" plus 8 hex chars of the full name's hash
        let keep_length = max_length.saturating_sub(9);
        let hash = format!("{:x}", md5::compute(name.as_bytes()));

        // Stay on a char boundary
        let mut end = keep_length.min(name.len());
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let prefix = &name[..end];

        format!("{}_{}", prefix, &hash[0..8])
    }
}

/// Identifier length limit of a dialect; PostgreSQL's 63 unless known otherwise
pub fn get_max_identifier_length(db_type: &str) -> usize {
    match db_type.to_lowercase().as_str() {
        "mysql" => 64,
        "sqlite" => 2048,
        _ => 63,
    }
}

/// Irregular singular/plural pairs Inflector gets wrong
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
    ("mouse", "mice"),
];

/// Convert a singular name to plural
pub fn pluralize(name: &str) -> String {
    let lowered = name.to_lowercase();
    IRREGULAR
        .iter()
        .find(|(singular, _)| *singular == lowered)
        .map(|(_, plural)| plural.to_string())
        .unwrap_or_else(|| name.to_plural())
}

/// Convert a plural name to singular
pub fn singularize(name: &str) -> String {
    let lowered = name.to_lowercase();
    IRREGULAR
        .iter()
        .find(|(_, plural)| *plural == lowered)
        .map(|(singular, _)| singular.to_string())
        .unwrap_or_else(|| name.to_singular())
}

/// Format SQL identifier according to database style (quoted, backticks, etc.)
pub fn format_sql_identifier(name: &str, db_type: &str) -> String {
    match db_type.to_lowercase().as_str() {
        "postgres" => format!("\"{}\"", name),
        "mysql" => format!("`{}`", name),
        "sqlite" => format!("\"{}\"", name),
        _ => name.to_string(),
    }
}

/// Format name as a valid file name (for migrations, etc.)
pub fn format_file_name(name: &str) -> String {
    // Replace characters that may cause issues in filenames
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_apply_naming_convention() {
        assert_eq!(apply_naming_convention("UserProfile", "snake_case"), "user_profile");
        assert_eq!(apply_naming_convention("user_profile", "camel_case"), "userProfile");
        assert_eq!(apply_naming_convention("user_profile", "pascal_case"), "UserProfile");
    }

    #[rstest]
    #[case("Product", "products")]
    #[case("ProductVariant", "product_variants")]
    #[case("Category", "categories")]
    #[case("Person", "people")]
    fn test_table_name(#[case] entity: &str, #[case] expected: &str) {
        assert_eq!(get_table_name(entity, "snake_case", true), expected);
    }

    #[rstest]
    #[case("products", "product")]
    #[case("categories", "category")]
    #[case("tags", "tag")]
    #[case("people", "person")]
    fn test_singularize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(singularize(input), expected);
    }

    #[test]
    fn test_foreign_key_name() {
        assert_eq!(
            get_foreign_key_name("products", "brand_id", 63),
            "products_brand_id_foreign"
        );

        let long = get_foreign_key_name("a_really_long_table_name_for_testing", "another_long_column_id", 40);
        assert_eq!(long.len(), 40);
        assert!(long.starts_with("a_really_long_table_name_for_te"));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("categories"));
        assert!(is_valid_identifier("_tmp1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("drop table"));
    }

    #[test]
    fn test_truncate_identifier() {
        let long_name = "this_is_a_very_long_identifier_that_exceeds_database_limits";
        let truncated = truncate_identifier(long_name, 30);

        assert_eq!(truncated.len(), 30);
        assert!(truncated.starts_with("this_is_a_very_long"));
    }

    #[test]
    fn test_truncate_multibyte_identifier() {
        let name = "é".repeat(40);
        let truncated = truncate_identifier(&name, 30);

        assert!(truncated.len() <= 30);
        assert!(truncated.starts_with(&"é".repeat(10)));
    }

    #[test]
    fn test_format_sql_identifier() {
        assert_eq!(format_sql_identifier("order", "postgres"), "\"order\"");
        assert_eq!(format_sql_identifier("order", "mysql"), "`order`");
    }

    #[test]
    fn test_format_file_name() {
        assert_eq!(format_file_name("Create Products/Table"), "create_products_table");
    }
}
