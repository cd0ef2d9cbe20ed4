//! # mongo-pg-migrate
//!
//! Migrates an application dataset from a MongoDB export to PostgreSQL.
//!
//! The pipeline runs in phases, each persisting its output as an artifact so
//! any phase can be re-run on its own:
//!
//! - **Export** documents per entity kind from a [`DocumentSource`]
//! - **Map** every ObjectId to a stable UUID ([`IdentityMapper`])
//! - **Transform** documents into typed records ([`transform_all`])
//! - **Load** records in dependency order, one transaction per batch ([`BatchLoader`])
//! - **Validate** counts, foreign keys and unique columns ([`MigrationValidator`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use mongo_pg_migrate::{Config, Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> mongo_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let summary = orchestrator.run(&RunOptions::default()).await?;
//!     println!("Loaded {} records ({})", summary.records_loaded(), summary.status);
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod identity;
pub mod loader;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod target;
pub mod transform;
pub mod validators;
pub mod verify;

// Re-exports for convenient access
pub use artifacts::ArtifactStore;
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use document::Document;
pub use entity::{EntityKind, WriteMode};
pub use error::{MigrateError, Result};
pub use identity::{build_mapping, IdentityMap, IdentityMapper, MappingReport};
pub use loader::{BatchFailure, BatchLoader, LoadResult, LoaderConfig};
pub use orchestrator::{HealthCheckResult, KindSummary, MigrationSummary, Orchestrator, RunOptions};
pub use source::{DocumentSource, DumpSource, MemorySource};
pub use state::{MigrationState, Phase};
pub use target::{Destination, MemoryDestination, PgDestination, SqlValue};
pub use transform::{
    transform_all, transform_document, TransformError, TransformFailure, TransformOutput,
    TransformedRecord,
};
pub use verify::{MigrationValidator, ValidationReport};
