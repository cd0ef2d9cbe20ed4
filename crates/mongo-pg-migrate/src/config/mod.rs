//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use std::time::Duration;

    const YAML: &str = r#"
source:
  path: ./export
  collections:
    account: people
target:
  host: localhost
  database: overtime
  user: migrator
  password: secret
  ssl_mode: disable
migration:
  artifacts_dir: ./artifacts
  batch_sizes:
    audit_entries: 250
  operation_timeout_secs: 15
"#;

    #[test]
    fn test_from_yaml_applies_defaults_and_overrides() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.r#type, "dump");
        assert_eq!(config.source.collection_for(EntityKind::Account), "people");
        assert_eq!(
            config.source.collection_for(EntityKind::OvertimeRequest),
            "overtimerequests"
        );
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.get_batch_size(EntityKind::AuditEntry), 250);
        assert_eq!(config.migration.get_batch_size(EntityKind::Account), 500);
        assert_eq!(config.migration.get_operation_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_hash_changes_with_config() {
        let a = Config::from_yaml(YAML).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.target.database = "other".into();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_missing_target_section_is_error() {
        assert!(Config::from_yaml("source:\n  path: ./export\n").is_err());
    }
}
