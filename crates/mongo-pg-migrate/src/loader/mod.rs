//! Batched, transactional loading of transformed records.
//!
//! Each kind's records are cut into fixed-size batches. A batch is written
//! in one destination transaction under the operation timeout. A failed
//! batch is recorded with its offset and the loader moves on to the next.

use crate::entity::{load_order, EntityKind};
use crate::error::{with_timeout, MigrateError, Result};
use crate::target::Destination;
use crate::transform::TransformedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A batch that failed to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Index of the batch's first record within the kind's input.
    pub offset: usize,
    pub size: usize,
    pub error: String,
}

/// Outcome of loading one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub kind: EntityKind,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_batches: Vec<BatchFailure>,
    pub dry_run: bool,
    /// Stopped by cancellation; `succeeded` counts the batches committed before it.
    #[serde(default)]
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl LoadResult {
    fn empty(kind: EntityKind, dry_run: bool) -> Self {
        Self {
            kind,
            attempted: 0,
            succeeded: 0,
            failed_batches: Vec::new(),
            dry_run,
            cancelled: false,
            duration_ms: 0,
        }
    }

    /// Records that were in a failed batch.
    pub fn failed(&self) -> usize {
        self.failed_batches.iter().map(|b| b.size).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Batch size per kind; kinds not listed use their default.
    pub batch_sizes: BTreeMap<EntityKind, usize>,
    /// Limit for one batch's transaction.
    pub operation_timeout: Duration,
    /// Report what would be written without touching the destination.
    pub dry_run: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_sizes: BTreeMap::new(),
            operation_timeout: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

impl LoaderConfig {
    pub fn batch_size(&self, kind: EntityKind) -> usize {
        self.batch_sizes
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_batch_size())
            .max(1)
    }
}

/// Writes transformed records to a [`Destination`].
pub struct BatchLoader {
    destination: Option<Arc<dyn Destination>>,
    config: LoaderConfig,
    cancel: CancellationToken,
}

impl BatchLoader {
    pub fn new(destination: Arc<dyn Destination>, config: LoaderConfig) -> Self {
        Self {
            destination: Some(destination),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// A loader that only plans: every kind is loaded as a dry run and no
    /// destination is needed.
    pub fn planner(config: LoaderConfig) -> Self {
        Self {
            destination: None,
            config: LoaderConfig {
                dry_run: true,
                ..config
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between batches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Load every record of `kind`.
    ///
    /// Returns `Err` only when a real load has no destination; batch
    /// failures are part of the [`LoadResult`]. On cancellation the loader
    /// stops before the next batch and returns the partial result with
    /// `cancelled` set. Batches committed before that stay committed.
    pub async fn load_kind(
        &self,
        kind: EntityKind,
        records: &[TransformedRecord],
    ) -> Result<LoadResult> {
        let start = Instant::now();
        let mut result = LoadResult::empty(kind, self.config.dry_run);
        result.attempted = records.len();

        if records.is_empty() {
            info!("{}: nothing to load", kind);
            return Ok(result);
        }

        if self.config.dry_run {
            result.succeeded = records.len();
            info!("{}: dry run, would load {} records", kind, records.len());
            return Ok(result);
        }

        let destination = self.destination.as_ref().ok_or_else(|| {
            MigrateError::Config("loading requires a destination connection".to_string())
        })?;
        let batch_size = self.config.batch_size(kind);
        let mode = kind.write_mode();
        let timeout_secs = self.config.operation_timeout.as_secs();
        info!(
            "{}: loading {} records in batches of {} ({:?})",
            kind,
            records.len(),
            batch_size,
            mode
        );

        for (i, batch) in records.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    "{}: cancelled after {} of {} records",
                    kind,
                    result.succeeded,
                    records.len()
                );
                result.cancelled = true;
                break;
            }

            let offset = i * batch_size;
            let write = with_timeout(
                self.config.operation_timeout,
                format!("{} batch at offset {}", kind, offset),
                destination.write_batch(kind, batch, mode),
            );

            match write.await {
                Ok(_) => {
                    result.succeeded += batch.len();
                    debug!("{}: batch at offset {} committed ({} records)", kind, offset, batch.len());
                }
                Err(e) => {
                    error!("{}: batch at offset {} failed: {}", kind, offset, e);
                    result.failed_batches.push(BatchFailure {
                        offset,
                        size: batch.len(),
                        error: e.to_string(),
                    });
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{}: loaded {}/{} records ({} failed batches, timeout {}s)",
            kind,
            result.succeeded,
            result.attempted,
            result.failed_batches.len(),
            timeout_secs
        );
        Ok(result)
    }

    /// Load `kinds` in dependency order. Kinds without an entry in
    /// `records` load as empty.
    ///
    /// Cancellation ends the walk: the kind in progress comes back with
    /// `cancelled` set and later kinds are absent from the result.
    pub async fn load_all(
        &self,
        kinds: &[EntityKind],
        records: &BTreeMap<EntityKind, Vec<TransformedRecord>>,
    ) -> Result<Vec<LoadResult>> {
        let mut results = Vec::with_capacity(kinds.len());
        for kind in load_order(kinds) {
            if self.cancel.is_cancelled() {
                warn!("Load cancelled before {}", kind);
                break;
            }
            let kind_records = records.get(&kind).map(Vec::as_slice).unwrap_or(&[]);
            let result = self.load_kind(kind, kind_records).await?;
            let cancelled = result.cancelled;
            results.push(result);
            if cancelled {
                break;
            }
        }
        Ok(results)
    }
}
