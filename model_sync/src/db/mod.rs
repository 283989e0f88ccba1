//! Database module for ModelSync
//!
//! This module handles database connections and migration persistence.

pub mod connection;
pub mod executor;
pub mod migrations;

// Re-export key types
pub use connection::DatabaseConnection;
pub use executor::DatabaseSink;
pub use migrations::{FileSink, MemorySink, MigrationSink};
