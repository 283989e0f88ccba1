//! Configuration handling for ModelSync

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

use crate::error::{Error, Result};

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    Ok(config)
}

/// Represents the complete ModelSync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub type_mapping: TypeMappingConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub schema: Option<String>,
}

/// How generated units are written out
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MigrationFormat {
    #[default]
    Sql,
    Json,
}

/// Migration settings configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: String,
    pub format: MigrationFormat,
    pub transaction_per_migration: bool,
    pub dry_run: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: "migrations".to_string(),
            format: MigrationFormat::Sql,
            transaction_per_migration: true,
            dry_run: false,
        }
    }
}

/// Declaration discovery configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub paths: Vec<String>,
    pub exclude_paths: Option<Vec<String>>,
    pub recursive_scan: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            paths: vec!["models".to_string()],
            exclude_paths: None,
            recursive_scan: true,
        }
    }
}

/// Reconciliation behavior configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchemaConfig {
    /// Skip malformed relationships instead of failing the foreign-key unit
    pub lenient_relationships: bool,
    pub add_identity: bool,
    pub add_timestamps: bool,
    pub add_soft_deletes: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            lenient_relationships: false,
            add_identity: true,
            add_timestamps: true,
            add_soft_deletes: true,
        }
    }
}

/// Naming conventions configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NamingConfig {
    pub pivot_separator: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            pivot_separator: "_".to_string(),
        }
    }
}

/// Type mapping configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TypeMappingConfig {
    /// Native type name -> abstract type name, checked before the built-in table
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}
