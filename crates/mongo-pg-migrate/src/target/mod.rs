//! Relational destination operations.

mod memory;
mod postgres;
mod sql;
mod tls;

pub use memory::MemoryDestination;
pub use postgres::PgDestination;

use crate::config::TargetConfig;
use crate::entity::{EntityKind, ForeignKey, UniqueField, WriteMode};
use crate::error::Result;
use crate::transform::TransformedRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trait for destination database operations.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Write one batch of records of `kind` inside a single transaction.
    /// Either every record commits or none does.
    async fn write_batch(
        &self,
        kind: EntityKind,
        records: &[TransformedRecord],
        mode: WriteMode,
    ) -> Result<u64>;

    /// Current row count of `kind`'s table.
    async fn count(&self, kind: EntityKind) -> Result<i64>;

    /// Rows whose non-null foreign key has no referenced row.
    async fn count_dangling(&self, fk: &ForeignKey) -> Result<i64>;

    /// Non-null values of a unique column that occur more than once.
    async fn duplicates(&self, field: &UniqueField) -> Result<Vec<DuplicateValue>>;

    /// Check that the destination is reachable.
    async fn ping(&self) -> Result<()>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// One duplicated value of a unique column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateValue {
    pub value: String,
    pub occurrences: i64,
}

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Timestamp(chrono::DateTime<chrono::Utc>),
    Json(serde_json::Value),
}

/// Type hint for NULL values to ensure correct PostgreSQL encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNullType {
    Bool,
    F64,
    String,
    Bytes,
    Uuid,
    Date,
    Time,
    Timestamp,
    Json,
}

/// Connect to the configured destination.
pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Arc<dyn Destination>> {
    Ok(Arc::new(PgDestination::new(config, max_conns).await?))
}
