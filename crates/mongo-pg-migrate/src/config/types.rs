//! Configuration type definitions.

use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source document store configuration.
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source type (only "dump" for now).
    #[serde(default = "default_dump")]
    pub r#type: String,

    /// Directory holding `mongoexport` output, one file per collection.
    pub path: String,

    /// Collection name overrides, keyed by entity kind name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, String>,
}

impl SourceConfig {
    /// Collection holding documents of `kind`.
    pub fn collection_for(&self, kind: EntityKind) -> String {
        lookup(&self.collections, kind)
            .cloned()
            .unwrap_or_else(|| kind.default_collection().to_string())
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory for intermediate artifacts (default: "migration-data").
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Per-kind batch size overrides, keyed by entity kind name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub batch_sizes: BTreeMap<String, usize>,

    /// Timeout for each source read, destination batch or validation query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,

    /// Maximum PostgreSQL connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pg_connections: Option<usize>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            batch_sizes: BTreeMap::new(),
            operation_timeout_secs: None,
            max_pg_connections: None,
        }
    }
}

impl MigrationConfig {
    /// Rows per transactional batch for `kind`.
    pub fn get_batch_size(&self, kind: EntityKind) -> usize {
        lookup(&self.batch_sizes, kind)
            .copied()
            .unwrap_or_else(|| kind.default_batch_size())
            .max(1)
    }

    pub fn get_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.unwrap_or(60))
    }

    pub fn get_max_pg_connections(&self) -> usize {
        self.max_pg_connections.unwrap_or(4)
    }
}

/// Entry keyed by any accepted spelling of `kind`.
fn lookup<V>(map: &BTreeMap<String, V>, kind: EntityKind) -> Option<&V> {
    map.iter()
        .find(|(name, _)| name.parse::<EntityKind>().ok() == Some(kind))
        .map(|(_, v)| v)
}

// Default value functions for serde
fn default_dump() -> String {
    "dump".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("migration-data")
}
