//! Configuration validation.

use super::Config;
use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.r#type != "dump" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'dump', got '{}'",
            config.source.r#type
        )));
    }
    if config.source.path.is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }
    for name in config.source.collections.keys() {
        name.parse::<EntityKind>().map_err(|_| {
            MigrateError::Config(format!("source.collections: unknown entity kind '{}'", name))
        })?;
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }
    if !SSL_MODES.contains(&config.target.ssl_mode.to_lowercase().as_str()) {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            config.target.ssl_mode
        )));
    }

    // Migration config validation - only check if explicitly set
    for (name, size) in &config.migration.batch_sizes {
        name.parse::<EntityKind>().map_err(|_| {
            MigrateError::Config(format!("migration.batch_sizes: unknown entity kind '{}'", name))
        })?;
        if *size == 0 {
            return Err(MigrateError::Config(format!(
                "migration.batch_sizes.{} must be at least 1",
                name
            )));
        }
    }
    if let Some(0) = config.migration.operation_timeout_secs {
        return Err(MigrateError::Config(
            "migration.operation_timeout_secs must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.max_pg_connections {
        return Err(MigrateError::Config(
            "migration.max_pg_connections must be at least 1".into(),
        ));
    }

    Ok(())
}
