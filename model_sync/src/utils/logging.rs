//! Logging utilities for ModelSync
//!
//! This module provides logging setup and configuration.

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize logging based on configuration
///
/// Returns `false` when no logging section is configured and nothing was installed.
pub fn init_logging(config: &Option<LoggingConfig>) -> Result<bool> {
    let config = match config {
        Some(cfg) => cfg,
        None => return Ok(false),
    };

    let env_filter = build_filter(&config.level)?;
    let json = config.format.eq_ignore_ascii_case("json");

    if let Some(file_path) = &config.file {
        // Ensure directory exists
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(file_path)?;
        let builder = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false);

        if json {
            install(builder.json().finish())?;
        } else {
            install(builder.finish())?;
        }
    } else if config.stdout {
        let builder = fmt::Subscriber::builder().with_env_filter(env_filter);

        if json {
            install(builder.json().finish())?;
        } else {
            install(builder.finish())?;
        }
    } else {
        return Ok(false);
    }

    Ok(true)
}

/// Filter from the environment plus a directive for this crate
fn build_filter(level: &str) -> Result<EnvFilter> {
    let level = parse_level(level);
    let directive = format!("model_sync={}", level)
        .parse()
        .map_err(|e| Error::ConfigError(format!("Invalid log directive: {}", e)))?;

    Ok(EnvFilter::from_default_env().add_directive(directive))
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn install<S>(subscriber: S) -> Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::ConfigError(format!("Logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("TRACE", Level::TRACE)]
    #[case("debug", Level::DEBUG)]
    #[case("warn", Level::WARN)]
    #[case("nonsense", Level::INFO)]
    fn test_parse_level(#[case] input: &str, #[case] expected: Level) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_no_config_installs_nothing() {
        assert!(!init_logging(&None).unwrap());
    }
}
