//! PostgreSQL destination backed by deadpool-postgres.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, error, info, warn};

use super::sql::{build_dangling_sql, build_duplicates_sql, build_write_sql, qualify_table};
use super::tls;
use super::{Destination, DuplicateValue, SqlValue};
use crate::config::TargetConfig;
use crate::entity::{EntityKind, ForeignKey, UniqueField, WriteMode};
use crate::error::{MigrateError, Result};
use crate::transform::TransformedRecord;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL limits a statement to 65535 bind parameters.
const MAX_PARAMS: usize = 65_535;

/// PostgreSQL destination pool.
pub struct PgDestination {
    pool: Pool,
    schema: String,
}

impl PgDestination {
    /// Connect and verify the connection with `SELECT 1`.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match tls::connector(&config.ssl_mode)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL destination pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL destination pool"))?
            }
        };

        let destination = Self {
            pool,
            schema: config.schema.clone(),
        };
        destination.ping().await?;

        info!(
            "Connected to PostgreSQL destination: {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(destination)
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn write_batch(
        &self,
        kind: EntityKind,
        records: &[TransformedRecord],
        mode: WriteMode,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records
            .iter()
            .map(|r| {
                r.values().map_err(|e| {
                    MigrateError::Transform(format!("{} {}: {}", kind, r.source_id(), e))
                })
            })
            .collect::<Result<Vec<Vec<SqlValue>>>>()?;
        let cols = TransformedRecord::column_names(kind);
        let rows_per_statement = (MAX_PARAMS / cols.len()).max(1);

        let mut client = self
            .client(&format!("writing {} batch", kind))
            .await?;
        // Dropping the transaction without commit rolls it back.
        let tx = client.transaction().await?;

        let mut written = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let (sql, params) = build_write_sql(&self.schema, kind.table_name(), cols, chunk, mode);
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            match tx.execute(&sql, &param_refs).await {
                Ok(n) => written += n,
                Err(e) => {
                    if let Some(first) = records.first() {
                        error!(
                            "{} write failed: {} - first record in batch: {}",
                            kind,
                            e,
                            first.source_id()
                        );
                    }
                    return Err(MigrateError::Target(e));
                }
            }
        }

        tx.commit().await?;
        debug!("{}: committed {} rows", kind, written);
        Ok(written)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let client = self.client("counting destination rows").await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            qualify_table(&self.schema, kind.table_name())
        );
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn count_dangling(&self, fk: &ForeignKey) -> Result<i64> {
        let client = self.client("checking referential integrity").await?;
        let row = client
            .query_one(&build_dangling_sql(&self.schema, fk), &[])
            .await?;
        Ok(row.get(0))
    }

    async fn duplicates(&self, field: &UniqueField) -> Result<Vec<DuplicateValue>> {
        let client = self.client("checking uniqueness").await?;
        let rows = client
            .query(&build_duplicates_sql(&self.schema, field), &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| DuplicateValue {
                value: row.get(0),
                occurrences: row.get(1),
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("testing PostgreSQL destination connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}
