//! Utilities for ModelSync
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use naming::{
    apply_naming_convention, get_foreign_key_name, get_table_name, pluralize, singularize,
};
