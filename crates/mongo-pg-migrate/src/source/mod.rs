//! Source document store access.
//!
//! The pipeline only needs two operations from the document store: read every
//! document of a kind, and count them. [`DocumentSource`] is that seam.
//!
//! - [`DumpSource`]: a directory of `mongoexport` output files
//! - [`MemorySource`]: documents held in memory (embedding and tests)

mod dump;
mod memory;

pub use dump::DumpSource;
pub use memory::MemorySource;

use crate::config::SourceConfig;
use crate::document::Document;
use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Read access to the source document store.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Read all documents of `kind`, fully materialized.
    async fn read_all(&self, kind: EntityKind) -> Result<Vec<Document>>;

    /// Count documents of `kind`.
    async fn count(&self, kind: EntityKind) -> Result<i64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Source type identifier (e.g. "dump", "memory").
    fn source_type(&self) -> &str;

    /// Release any held resources.
    async fn close(&self);
}

/// Open the source described by `config`.
pub async fn connect(config: &SourceConfig) -> Result<Arc<dyn DocumentSource>> {
    match config.r#type.as_str() {
        "dump" => {
            let source = DumpSource::open(config)?;
            Ok(Arc::new(source))
        }
        other => Err(MigrateError::Config(format!(
            "unsupported source.type '{}'",
            other
        ))),
    }
}
