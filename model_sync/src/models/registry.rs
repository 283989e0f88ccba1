//! Declaration registry for ModelSync
//!
//! This module manages the registration and discovery of entity declarations. Files
//! hold one entity each, in TOML, YAML or JSON.

use glob::Pattern;
use indexmap::IndexMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ModelsConfig;
use crate::error::{Error, Result};
use crate::models::Entity;
use crate::schema::types::EntityDeclaration;

/// Registry of entity declarations
pub struct DeclarationRegistry {
    declarations: IndexMap<String, EntityDeclaration>,
    config: ModelsConfig,
}

impl DeclarationRegistry {
    /// Create a new, empty registry
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            declarations: IndexMap::new(),
            config: config.clone(),
        }
    }

    /// Scan the configured paths for declaration files and register them
    ///
    /// Returns the number of declarations found.
    pub fn scan_and_register(&mut self) -> Result<usize> {
        let exclude_patterns = self
            .config
            .exclude_paths
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| {
                    Error::ConfigError(format!("Invalid exclude pattern `{}`: {}", pattern, e))
                })
            })
            .collect::<Result<Vec<Pattern>>>()?;

        let paths = self.config.paths.clone();
        let max_depth = if self.config.recursive_scan { usize::MAX } else { 1 };
        let mut found = 0;

        for path in &paths {
            let base_path = Path::new(path);

            if !base_path.exists() {
                return Err(Error::ConfigError(format!("Path does not exist: {}", path)));
            }

            for entry in WalkDir::new(base_path)
                .follow_links(true)
                .max_depth(max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();

                if !path.is_file() || !is_declaration_file(path) {
                    continue;
                }

                if exclude_patterns
                    .iter()
                    .any(|pattern| pattern.matches_path(path))
                {
                    tracing::debug!(path = %path.display(), "Skipping excluded declaration");
                    continue;
                }

                let declaration = load_declaration(path)?;
                self.register_declaration(declaration)?;
                found += 1;
            }
        }

        tracing::info!(count = found, "Registered declarations from files");
        Ok(found)
    }

    /// Register the declaration of a Rust entity type
    pub fn register<E: Entity>(&mut self) -> Result<()> {
        self.register_declaration(E::declaration())
    }

    /// Register a declaration, replacing any previous one with the same name
    pub fn register_declaration(&mut self, declaration: EntityDeclaration) -> Result<()> {
        declaration.validate()?;

        if self.declarations.contains_key(&declaration.name) {
            tracing::warn!(entity = %declaration.name, "Replacing existing declaration");
        }

        self.declarations
            .insert(declaration.name.clone(), declaration);
        Ok(())
    }

    /// Look up a declaration by entity name, falling back to table name
    pub fn get(&self, name: &str) -> Result<&EntityDeclaration> {
        if let Some(declaration) = self.declarations.get(name) {
            return Ok(declaration);
        }

        self.declarations
            .values()
            .find(|declaration| {
                declaration.name.eq_ignore_ascii_case(name) || declaration.table_name() == name
            })
            .ok_or_else(|| Error::DeclarationNotFound(name.to_string()))
    }

    /// All registered declarations, in registration order
    pub fn declarations(&self) -> impl Iterator<Item = &EntityDeclaration> {
        self.declarations.values()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

fn is_declaration_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("toml" | "yaml" | "yml" | "json")
    )
}

/// Load one declaration file, choosing the format by extension
pub fn load_declaration(path: &Path) -> Result<EntityDeclaration> {
    let content = std::fs::read_to_string(path)?;

    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(Error::from),
        Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(Error::from),
        Some("json") => serde_json::from_str(&content).map_err(Error::from),
        _ => Err(Error::ValidationError(format!(
            "Unsupported declaration file: {}",
            path.display()
        ))),
    };

    parsed.map_err(|e| {
        Error::ValidationError(format!("Failed to load {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{AbstractType, FieldSpec, OnDelete, RelationshipSpec};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    const PRODUCT_TOML: &str = r#"
name = "Product"

[[fields]]
name = "name"
type = "string"
length = 255
nullable = true

[[fields]]
name = "price"
type = "integer"
nullable = true

[[relationships]]
type = "belongsTo"
column = "brand_id"
table = "brands"
on_delete = "set null"

[[relationships]]
type = "manyToMany"
table1 = "products"
table2 = "tags"
"#;

    const BRAND_YAML: &str = r#"
name: Brand
fields:
  - name: title
    type: string
"#;

    const ORDER_JSON: &str = r#"{
  "name": "Order",
  "table": "shop_orders",
  "fields": [{"name": "total", "type": "decimal", "default": 0}]
}"#;

    fn config_for(path: &Path) -> ModelsConfig {
        ModelsConfig {
            paths: vec![path.display().to_string()],
            ..ModelsConfig::default()
        }
    }

    #[test]
    fn test_scan_loads_every_format() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("product.toml"), PRODUCT_TOML).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/brand.yaml"), BRAND_YAML).unwrap();
        fs::write(dir.path().join("order.json"), ORDER_JSON).unwrap();
        fs::write(dir.path().join("README.md"), "not a declaration").unwrap();

        let mut registry = DeclarationRegistry::new(&config_for(dir.path()));
        assert_eq!(registry.scan_and_register().unwrap(), 3);

        let product = registry.get("Product").unwrap();
        assert_eq!(product.table_name(), "products");
        assert_eq!(
            product.fields[0],
            FieldSpec::new("name", AbstractType::String).length(255).nullable(true)
        );
        assert!(matches!(
            &product.relationships[0],
            RelationshipSpec::BelongsTo(reference) if reference.on_delete == OnDelete::SetNull
        ));

        assert_eq!(registry.get("shop_orders").unwrap().name, "Order");
        assert_eq!(registry.get("brand").unwrap().name, "Brand");
    }

    #[test]
    fn test_non_recursive_scan_and_excludes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("product.toml"), PRODUCT_TOML).unwrap();
        fs::write(dir.path().join("order.json"), ORDER_JSON).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/brand.yaml"), BRAND_YAML).unwrap();

        let config = ModelsConfig {
            recursive_scan: false,
            exclude_paths: Some(vec!["*.json".to_string()]),
            ..config_for(dir.path())
        };

        let mut registry = DeclarationRegistry::new(&config);
        assert_eq!(registry.scan_and_register().unwrap(), 1);
        assert!(matches!(registry.get("Brand"), Err(Error::DeclarationNotFound(_))));
    }

    #[test]
    fn test_invalid_declaration_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("empty.toml"), "name = \"Empty\"\n").unwrap();

        let mut registry = DeclarationRegistry::new(&config_for(dir.path()));
        assert!(matches!(
            registry.scan_and_register(),
            Err(Error::EmptySchema(name)) if name == "Empty"
        ));
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let config = ModelsConfig {
            paths: vec!["/definitely/not/here".to_string()],
            ..ModelsConfig::default()
        };

        let mut registry = DeclarationRegistry::new(&config);
        assert!(matches!(registry.scan_and_register(), Err(Error::ConfigError(_))));
    }
}
