//! Error types for ModelSync

use thiserror::Error;

/// Result type for ModelSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ModelSync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Entity declaration not found: {0}")]
    DeclarationNotFound(String),

    #[error("Entity `{0}` declares no fields")]
    EmptySchema(String),

    #[error("Invalid relationship `{relationship}` on `{entity}`: {message}")]
    Configuration {
        entity: String,
        relationship: String,
        message: String,
    },

    #[error("Failed to introspect table `{table}`: {message}")]
    IntrospectionFailure { table: String, message: String },

    #[error("Failed to persist migration `{unit}`: {message}")]
    PersistenceFailure { unit: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

impl Error {
    /// Wrap any displayable failure as an introspection error for `table`
    pub fn introspection(table: &str, error: impl std::fmt::Display) -> Self {
        Error::IntrospectionFailure {
            table: table.to_string(),
            message: error.to_string(),
        }
    }

    /// Wrap any displayable failure as a persistence error for `unit`
    pub fn persistence(unit: &str, error: impl std::fmt::Display) -> Self {
        Error::PersistenceFailure {
            unit: unit.to_string(),
            message: error.to_string(),
        }
    }
}

/// Convert Serde JSON errors to ModelSync errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert YAML errors to ModelSync errors
impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to ModelSync errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
