//! Migration orchestrator - main workflow coordinator.
//!
//! A run is export -> map -> transform -> load -> validate. Each phase reads
//! its inputs from the [`ArtifactStore`] unless an earlier phase of the same
//! run already holds them in memory, so every phase can also run on its own.

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::document::{canonical_id, Document};
use crate::entity::{load_order, EntityKind};
use crate::error::{with_timeout, MigrateError, Result};
use crate::identity::{IdentityMap, IdentityMapper, MappingReport};
use crate::loader::{BatchLoader, LoadResult, LoaderConfig};
use crate::source::{self, DocumentSource};
use crate::state::{MigrationState, Phase, RunStatus};
use crate::target::{self, Destination};
use crate::transform::{transform_all, TransformedRecord};
use crate::verify::{MigrationValidator, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Options for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Transform and plan the load without writing to the destination.
    pub dry_run: bool,
    /// Reuse existing raw artifacts instead of reading the source.
    pub skip_export: bool,
    pub skip_validation: bool,
    /// Restrict export, transform, load and validation to one kind.
    pub only: Option<EntityKind>,
    /// Discard any persisted identity map and generate every UUID anew.
    pub fresh_identities: bool,
    /// Skip kinds whose load completed in the run recorded in the state file.
    pub resume: bool,
}

impl RunOptions {
    fn kinds(&self) -> Vec<EntityKind> {
        match self.only {
            Some(kind) => vec![kind],
            None => EntityKind::ALL.to_vec(),
        }
    }
}

/// A document dropped by the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub index: usize,
    pub source_id: Option<String>,
    pub error: String,
}

/// Per-kind outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindSummary {
    pub kind: EntityKind,
    pub exported: Option<usize>,
    pub mapped: Option<usize>,
    pub transformed: Option<usize>,
    pub record_errors: Vec<RecordError>,
    pub warnings: Vec<String>,
    pub load: Option<LoadResult>,
    /// Kind-level failure; later phases skipped this kind.
    pub error: Option<String>,
    /// Already completed in the resumed run.
    pub skipped: bool,
}

impl KindSummary {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            exported: None,
            mapped: None,
            transformed: None,
            record_errors: Vec::new(),
            warnings: Vec::new(),
            load: None,
            error: None,
            skipped: false,
        }
    }

    /// Records that did not reach the destination.
    pub fn failed(&self) -> usize {
        self.record_errors.len() + self.load.as_ref().map(LoadResult::failed).unwrap_or(0)
    }

    pub fn has_issues(&self) -> bool {
        self.error.is_some()
            || !self.record_errors.is_empty()
            || self.load.as_ref().is_some_and(|l| !l.is_success())
    }
}

/// Result of a migration run or a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, completed_with_issues, cancelled or failed.
    pub status: String,

    pub phases: Vec<Phase>,
    pub dry_run: bool,
    pub only: Option<EntityKind>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub kinds: Vec<KindSummary>,
    pub mapping: Option<MappingReport>,
    pub validation: Option<ValidationReport>,
}

impl MigrationSummary {
    fn new(run_id: String, phases: &[Phase], options: &RunOptions) -> Self {
        Self {
            run_id,
            status: "running".to_string(),
            phases: phases.to_vec(),
            dry_run: options.dry_run,
            only: options.only,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: 0.0,
            kinds: options.kinds().into_iter().map(KindSummary::new).collect(),
            mapping: None,
            validation: None,
        }
    }

    fn kind_mut(&mut self, kind: EntityKind) -> &mut KindSummary {
        let pos = match self.kinds.iter().position(|k| k.kind == kind) {
            Some(pos) => pos,
            None => {
                self.kinds.push(KindSummary::new(kind));
                self.kinds.len() - 1
            }
        };
        &mut self.kinds[pos]
    }

    pub fn kind(&self, kind: EntityKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Kinds that failed at kind level.
    pub fn failed_kinds(&self) -> Vec<EntityKind> {
        self.kinds
            .iter()
            .filter(|k| k.error.is_some())
            .map(|k| k.kind)
            .collect()
    }

    /// Total records written (or that would be written in a dry run).
    pub fn records_loaded(&self) -> usize {
        self.kinds
            .iter()
            .filter_map(|k| k.load.as_ref())
            .map(|l| l.succeeded)
            .sum()
    }

    /// True when any record, batch, kind or validation check failed.
    /// Soft warnings do not count.
    pub fn has_issues(&self) -> bool {
        self.kinds.iter().any(KindSummary::has_issues)
            || self.validation.as_ref().is_some_and(|v| !v.valid)
    }

    fn finish(&mut self, status: &str) {
        let completed_at = Utc::now();
        self.status = status.to_string();
        self.duration_seconds =
            (completed_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.completed_at = Some(completed_at);
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_type: String,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// In-memory inputs and outputs carried between phases of one run.
#[derive(Default)]
struct RunData {
    docs: BTreeMap<EntityKind, Vec<Document>>,
    map: Option<IdentityMap>,
    records: BTreeMap<EntityKind, Vec<TransformedRecord>>,
    failed: BTreeSet<EntityKind>,
    completed: BTreeSet<EntityKind>,
}

impl RunData {
    fn is_active(&self, kind: EntityKind) -> bool {
        !self.failed.contains(&kind) && !self.completed.contains(&kind)
    }

    fn active(&self, kinds: &[EntityKind]) -> Vec<EntityKind> {
        kinds.iter().copied().filter(|k| self.is_active(*k)).collect()
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn DocumentSource>,
    destination: Option<Arc<dyn Destination>>,
    artifacts: ArtifactStore,
    state_file: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator connected to the configured source and target.
    pub async fn new(config: Config) -> Result<Self> {
        let source = source::connect(&config.source).await?;
        let destination =
            target::connect(&config.target, config.migration.get_max_pg_connections()).await?;
        Ok(Self::with_collaborators(config, source, destination))
    }

    /// Create an orchestrator that only opens the source. Export, map,
    /// transform and dry-run loads work; real loads and validation fail.
    pub async fn offline(config: Config) -> Result<Self> {
        let source = source::connect(&config.source).await?;
        Ok(Self::build(config, source, None))
    }

    /// Create an orchestrator over already-open collaborators.
    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn DocumentSource>,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self::build(config, source, Some(destination))
    }

    fn build(
        config: Config,
        source: Arc<dyn DocumentSource>,
        destination: Option<Arc<dyn Destination>>,
    ) -> Self {
        let artifacts = ArtifactStore::new(config.migration.artifacts_dir.clone());
        Self {
            config,
            source,
            destination,
            artifacts,
            state_file: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Stop between kinds and batches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run the full pipeline.
    pub async fn run(&self, options: &RunOptions) -> Result<MigrationSummary> {
        let mut phases = Vec::with_capacity(5);
        if !options.skip_export {
            phases.push(Phase::Export);
        }
        phases.extend([Phase::Map, Phase::Transform, Phase::Load]);
        if options.dry_run {
            info!("Dry run: validation skipped, destination is not written");
        } else if !options.skip_validation {
            phases.push(Phase::Validate);
        }
        self.execute(&phases, options).await
    }

    /// Run one phase against the artifacts of earlier runs.
    pub async fn run_phase(&self, phase: Phase, options: &RunOptions) -> Result<MigrationSummary> {
        self.execute(&[phase], options).await
    }

    async fn execute(&self, phases: &[Phase], options: &RunOptions) -> Result<MigrationSummary> {
        let mut state = self.initial_state(options)?;
        let run_id = state
            .as_ref()
            .map(|s| s.run_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut summary = MigrationSummary::new(run_id, phases, options);
        let mut data = RunData::default();
        if options.resume {
            if let Some(ref state) = state {
                for kind in options.kinds() {
                    if state.is_kind_completed(kind) {
                        info!("{}: completed in run {}, skipping", kind, state.run_id);
                        data.completed.insert(kind);
                        summary.kind_mut(kind).skipped = true;
                    }
                }
            }
        }

        info!(
            "Starting {} {:?} (run {})",
            if options.dry_run { "dry run" } else { "migration" },
            phases,
            summary.run_id
        );

        let outcome = self
            .execute_phases(phases, options, &mut summary, &mut data, &mut state)
            .await;

        let (status, run_status) = match &outcome {
            Ok(()) if summary.has_issues() => ("completed_with_issues", RunStatus::CompletedWithIssues),
            Ok(()) => ("completed", RunStatus::Completed),
            Err(MigrateError::Cancelled) => ("cancelled", RunStatus::Cancelled),
            Err(_) => ("failed", RunStatus::Failed),
        };
        summary.finish(status);

        if let Some(ref mut state) = state {
            state.finish(run_status);
            self.save_state(state)?;
        }
        if let Err(e) = self.artifacts.save_report(&summary) {
            warn!("Failed to write run report: {}", e);
        }

        match outcome {
            Ok(()) => {
                info!(
                    "Run {}: {} records loaded in {:.1}s",
                    summary.status,
                    summary.records_loaded(),
                    summary.duration_seconds
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Run {}: {}", summary.status, e);
                Err(e)
            }
        }
    }

    async fn execute_phases(
        &self,
        phases: &[Phase],
        options: &RunOptions,
        summary: &mut MigrationSummary,
        data: &mut RunData,
        state: &mut Option<MigrationState>,
    ) -> Result<()> {
        let kinds = load_order(&options.kinds());

        for &phase in phases {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            info!("Phase {:?}", phase);
            if let Some(state) = state.as_mut() {
                for kind in data.active(&kinds) {
                    state.kind_mut(kind).enter(phase);
                }
            }

            let outcome = match phase {
                Phase::Export => self.export(&kinds, summary, data).await,
                Phase::Map => self.map(&kinds, options, summary, data),
                Phase::Transform => self.transform(&kinds, summary, data),
                Phase::Load => self.load(&kinds, options.dry_run, summary, data).await,
                Phase::Validate => self.validate(&kinds).await.map(|report| {
                    summary.validation = Some(report);
                }),
            };

            // Partial progress of an interrupted phase is recorded too.
            if let Some(state) = state.as_mut() {
                record_progress(state, phase, options.dry_run, summary, data);
                self.save_state(state)?;
            }
            outcome?;
        }
        Ok(())
    }

    async fn export(
        &self,
        kinds: &[EntityKind],
        summary: &mut MigrationSummary,
        data: &mut RunData,
    ) -> Result<()> {
        let timeout = self.config.migration.get_operation_timeout();

        for kind in data.active(kinds) {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let read = with_timeout(
                timeout,
                format!("export {}", kind),
                self.source.read_all(kind),
            )
            .await;

            match read {
                Ok(docs) => {
                    self.artifacts.save_raw(kind, &docs)?;
                    info!("{}: exported {} documents", kind, docs.len());
                    summary.kind_mut(kind).exported = Some(docs.len());
                    data.docs.insert(kind, docs);
                }
                Err(e) => fail_kind(summary, data, kind, format!("export failed: {}", e)),
            }
        }
        Ok(())
    }

    fn map(
        &self,
        kinds: &[EntityKind],
        options: &RunOptions,
        summary: &mut MigrationSummary,
        data: &mut RunData,
    ) -> Result<()> {
        let mut mapper = if options.fresh_identities {
            info!("Starting from an empty identity map");
            IdentityMapper::new()
        } else {
            match self.artifacts.load_identity_map_if_present()? {
                Some(existing) => {
                    info!("Reusing {} persisted identities", existing.len());
                    IdentityMapper::from_existing(existing)
                }
                None => IdentityMapper::new(),
            }
        };

        // Identifiers of kinds outside the run are still needed to resolve
        // references, so every kind with a raw artifact is mapped.
        for kind in EntityKind::ALL {
            let selected = kinds.contains(&kind);
            if data.failed.contains(&kind) {
                mapper.record_failure(kind, "documents unavailable");
                continue;
            }
            if !selected && !data.docs.contains_key(&kind) && !self.artifacts.has_raw(kind) {
                debug!("{}: no raw artifact, not mapped", kind);
                continue;
            }

            match self.raw_documents(kind, &mut data.docs) {
                Ok(docs) => {
                    let report = mapper.add_documents(kind, docs);
                    let mapped = report.generated + report.reused;
                    if selected {
                        let entry = summary.kind_mut(kind);
                        entry.mapped = Some(mapped);
                        entry.warnings.extend(report.warnings.iter().cloned());
                    }
                }
                Err(e @ MigrateError::ArtifactMissing(_)) => return Err(e),
                Err(e) => {
                    mapper.record_failure(kind, e.to_string());
                    if selected {
                        fail_kind(summary, data, kind, format!("mapping failed: {}", e));
                    }
                }
            }
        }

        let (map, report) = mapper.finish();
        self.artifacts.save_identity_map(&map)?;
        info!(
            "Identity map persisted: {} identifiers, {} warnings",
            map.len(),
            report.warnings()
        );
        summary.mapping = Some(report);
        data.map = Some(map);
        Ok(())
    }

    fn transform(
        &self,
        kinds: &[EntityKind],
        summary: &mut MigrationSummary,
        data: &mut RunData,
    ) -> Result<()> {
        if data.map.is_none() {
            data.map = Some(self.artifacts.load_identity_map()?);
        }

        for kind in data.active(kinds) {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let docs = match self.raw_documents(kind, &mut data.docs) {
                Ok(docs) => docs,
                Err(e @ MigrateError::ArtifactMissing(_)) => return Err(e),
                Err(e) => {
                    fail_kind(summary, data, kind, format!("transform failed: {}", e));
                    continue;
                }
            };
            let map = data.map.as_ref().ok_or_else(|| {
                MigrateError::State("identity map unavailable after mapping".into())
            })?;

            let output = transform_all(kind, docs, map);
            self.artifacts.save_transformed(kind, &output.records)?;
            self.artifacts.save_failures(kind, &output.failures)?;

            let entry = summary.kind_mut(kind);
            entry.transformed = Some(output.records.len());
            entry.warnings.extend(output.warnings);
            entry.record_errors = output
                .failures
                .iter()
                .map(|f| RecordError {
                    index: f.index,
                    source_id: f.document.get("_id").and_then(canonical_id),
                    error: f.error.clone(),
                })
                .collect();
            data.records.insert(kind, output.records);
        }
        Ok(())
    }

    async fn load(
        &self,
        kinds: &[EntityKind],
        dry_run: bool,
        summary: &mut MigrationSummary,
        data: &mut RunData,
    ) -> Result<()> {
        let config = LoaderConfig {
            batch_sizes: EntityKind::ALL
                .iter()
                .map(|&k| (k, self.config.migration.get_batch_size(k)))
                .collect(),
            operation_timeout: self.config.migration.get_operation_timeout(),
            dry_run,
        };
        let loader = if dry_run {
            BatchLoader::planner(config)
        } else {
            BatchLoader::new(self.destination()?, config)
        }
        .with_cancellation(self.cancel.clone());

        let mut ready = Vec::new();
        for kind in data.active(kinds) {
            if !data.records.contains_key(&kind) {
                match self.artifacts.load_transformed(kind) {
                    Ok(records) => {
                        data.records.insert(kind, records);
                    }
                    Err(e @ MigrateError::ArtifactMissing(_)) => return Err(e),
                    Err(e) => {
                        fail_kind(summary, data, kind, format!("load failed: {}", e));
                        continue;
                    }
                }
            }
            ready.push(kind);
        }

        let results = loader.load_all(&ready, &data.records).await?;
        let interrupted = results.len() < ready.len() || results.iter().any(|r| r.cancelled);
        for result in results {
            let kind = result.kind;
            summary.kind_mut(kind).load = Some(result);
        }
        if interrupted {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    async fn validate(&self, kinds: &[EntityKind]) -> Result<ValidationReport> {
        let validator = MigrationValidator::new(
            self.source.clone(),
            self.destination()?,
            self.config.migration.get_operation_timeout(),
        );
        Ok(validator.validate(kinds).await)
    }

    fn destination(&self) -> Result<Arc<dyn Destination>> {
        self.destination.clone().ok_or_else(|| {
            MigrateError::Config("this phase requires a destination connection".to_string())
        })
    }

    /// Documents of `kind`, from this run's export or the raw artifact.
    fn raw_documents<'a>(
        &self,
        kind: EntityKind,
        docs: &'a mut BTreeMap<EntityKind, Vec<Document>>,
    ) -> Result<&'a [Document]> {
        if !docs.contains_key(&kind) {
            docs.insert(kind, self.artifacts.load_raw(kind)?);
        }
        Ok(docs.get(&kind).map(Vec::as_slice).unwrap_or(&[]))
    }

    fn initial_state(&self, options: &RunOptions) -> Result<Option<MigrationState>> {
        let Some(ref path) = self.state_file else {
            if options.resume {
                return Err(MigrateError::Config(
                    "--state-file is required for resume".to_string(),
                ));
            }
            return Ok(None);
        };

        let config_hash = self.config.hash();
        if options.resume {
            if let Some(state) = MigrationState::load_if_exists(path)? {
                state.validate_config(&config_hash)?;
                info!("Resuming from state file: {:?}", path);
                return Ok(Some(state));
            }
            warn!("State file {:?} not found, starting a new run", path);
        }

        Ok(Some(MigrationState::new(
            uuid::Uuid::new_v4().to_string(),
            config_hash,
        )))
    }

    fn save_state(&self, state: &mut MigrationState) -> Result<()> {
        if let Some(ref path) = self.state_file {
            state.save(path)?;
        }
        Ok(())
    }

    /// Ping the source and the destination.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let timeout = self.config.migration.get_operation_timeout();

        let start = Instant::now();
        let source = with_timeout(timeout, "source ping", self.source.ping()).await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = match &self.destination {
            Some(destination) => with_timeout(timeout, "target ping", destination.ping()).await,
            None => Err(MigrateError::Config("destination not connected".to_string())),
        };
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_type: self.source.source_type().to_string(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_type: self
                .destination
                .as_ref()
                .map(|d| d.db_type().to_string())
                .unwrap_or_else(|| "none".to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source.is_ok() && target.is_ok(),
        })
    }

    /// Release source and destination resources.
    pub async fn close(&self) {
        self.source.close().await;
        if let Some(ref destination) = self.destination {
            destination.close().await;
        }
    }
}

fn fail_kind(summary: &mut MigrationSummary, data: &mut RunData, kind: EntityKind, error: String) {
    error!("{}: {}", kind, error);
    summary.kind_mut(kind).error = Some(error);
    data.failed.insert(kind);
}

fn record_progress(
    state: &mut MigrationState,
    phase: Phase,
    dry_run: bool,
    summary: &MigrationSummary,
    data: &RunData,
) {
    for entry in &summary.kinds {
        if data.completed.contains(&entry.kind) {
            continue;
        }
        let kind_state = state.kind_mut(entry.kind);
        if let Some(ref error) = entry.error {
            kind_state.mark_failed(error);
            continue;
        }
        kind_state.exported = entry.exported.unwrap_or(kind_state.exported);
        kind_state.transformed = entry.transformed.unwrap_or(kind_state.transformed);
        kind_state.transform_failures = entry.record_errors.len();

        if phase == Phase::Load && !dry_run {
            if let Some(ref load) = entry.load {
                kind_state.loaded = load.succeeded;
                kind_state.failed_batches = load.failed_batches.len();
                if load.cancelled {
                    kind_state.mark_failed(&format!(
                        "cancelled after {} of {} records",
                        load.succeeded, load.attempted
                    ));
                } else if load.is_success() {
                    kind_state.mark_completed();
                } else {
                    kind_state.mark_failed(&format!(
                        "{} batches failed ({} records)",
                        load.failed_batches.len(),
                        load.failed()
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::target::MemoryDestination;
    use serde_json::json;
    use tempfile::TempDir;

    const ALICE: &str = "65a000000000000000000001";
    const BOB: &str = "65a000000000000000000002";

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn config(dir: &TempDir) -> Config {
        Config::from_yaml(&format!(
            "source:\n  path: ./unused\ntarget:\n  host: localhost\n  database: d\n  user: u\nmigration:\n  artifacts_dir: {}\n",
            dir.path().display()
        ))
        .unwrap()
    }

    fn source() -> Arc<MemorySource> {
        Arc::new(
            MemorySource::new()
                .with_documents(
                    EntityKind::Account,
                    vec![
                        doc(json!({"_id": {"$oid": ALICE}, "email": "alice@example.com"})),
                        doc(json!({"_id": {"$oid": BOB}, "email": "bob@example.com"})),
                    ],
                )
                .with_documents(
                    EntityKind::OvertimeRequest,
                    vec![doc(json!({
                        "_id": {"$oid": "65b000000000000000000001"},
                        "employeeId": {"$oid": ALICE},
                        "date": "2024-03-01",
                        "startTime": "18:00",
                        "endTime": "20:00",
                        "hours": 2
                    }))],
                ),
        )
    }

    #[tokio::test]
    async fn test_full_run_is_clean() {
        let dir = TempDir::new().unwrap();
        let dest = Arc::new(MemoryDestination::new());
        let orchestrator = Orchestrator::with_collaborators(config(&dir), source(), dest.clone());

        let summary = orchestrator.run(&RunOptions::default()).await.unwrap();

        assert_eq!(summary.status, "completed");
        assert!(!summary.has_issues());
        assert_eq!(summary.records_loaded(), 3);
        assert!(summary.validation.as_ref().unwrap().valid);
        assert_eq!(dest.count(EntityKind::OvertimeRequest).await.unwrap(), 1);
        assert!(dir.path().join("report.json").exists());
    }

    #[tokio::test]
    async fn test_unreadable_kind_fails_alone() {
        let dir = TempDir::new().unwrap();
        let source = source();
        source.fail_reads(EntityKind::OvertimeRequest);
        let dest = Arc::new(MemoryDestination::new());
        let orchestrator = Orchestrator::with_collaborators(config(&dir), source, dest.clone());

        let summary = orchestrator.run(&RunOptions::default()).await.unwrap();

        assert_eq!(summary.status, "completed_with_issues");
        assert_eq!(summary.failed_kinds(), vec![EntityKind::OvertimeRequest]);
        assert_eq!(dest.count(EntityKind::Account).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_skip_export_without_artifacts_is_fatal() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::with_collaborators(
            config(&dir),
            source(),
            Arc::new(MemoryDestination::new()),
        );
        let options = RunOptions {
            skip_export: true,
            ..Default::default()
        };
        let err = orchestrator.run(&options).await.unwrap_err();
        assert!(matches!(err, MigrateError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn test_only_mode_resolves_references_from_other_kinds() {
        let dir = TempDir::new().unwrap();
        let dest = Arc::new(MemoryDestination::new());
        let orchestrator = Orchestrator::with_collaborators(config(&dir), source(), dest.clone());
        orchestrator.run(&RunOptions::default()).await.unwrap();

        let options = RunOptions {
            only: Some(EntityKind::OvertimeRequest),
            ..Default::default()
        };
        let summary = orchestrator.run(&options).await.unwrap();
        assert_eq!(summary.kinds.len(), 1);
        assert!(summary.kind(EntityKind::OvertimeRequest).unwrap().record_errors.is_empty());
        assert_eq!(dest.count(EntityKind::OvertimeRequest).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identities_persist_across_runs() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::with_collaborators(
            config(&dir),
            source(),
            Arc::new(MemoryDestination::new()),
        );
        orchestrator.run(&RunOptions::default()).await.unwrap();
        let first = orchestrator.artifacts().load_identity_map().unwrap();

        orchestrator.run(&RunOptions::default()).await.unwrap();
        let second = orchestrator.artifacts().load_identity_map().unwrap();
        assert_eq!(first, second);

        let fresh = RunOptions {
            fresh_identities: true,
            dry_run: true,
            ..Default::default()
        };
        orchestrator.run(&fresh).await.unwrap();
        let third = orchestrator.artifacts().load_identity_map().unwrap();
        assert_ne!(
            first.resolve(EntityKind::Account, ALICE),
            third.resolve(EntityKind::Account, ALICE)
        );
    }

    #[tokio::test]
    async fn test_resume_skips_completed_kinds() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let dest = Arc::new(MemoryDestination::new());
        let orchestrator = Orchestrator::with_collaborators(config(&dir), source(), dest.clone())
            .with_state_file(state_file.clone());
        let first = orchestrator.run(&RunOptions::default()).await.unwrap();

        let resumed = orchestrator
            .run(&RunOptions {
                resume: true,
                skip_validation: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resumed.run_id, first.run_id);
        assert!(resumed.kinds.iter().filter(|k| k.load.is_none()).all(|k| k.skipped));
        assert_eq!(dest.transactions(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_reported() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = Orchestrator::with_collaborators(
            config(&dir),
            source(),
            Arc::new(MemoryDestination::new()),
        )
        .with_cancellation(cancel);

        let err = orchestrator.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        let report = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        assert!(report.contains("\"cancelled\""));
    }

    /// Cancels the run once its first batch has committed.
    struct CancelAfterFirstBatch {
        inner: MemoryDestination,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl Destination for CancelAfterFirstBatch {
        async fn write_batch(
            &self,
            kind: EntityKind,
            records: &[TransformedRecord],
            mode: crate::entity::WriteMode,
        ) -> Result<u64> {
            let written = self.inner.write_batch(kind, records, mode).await?;
            self.cancel.cancel();
            Ok(written)
        }

        async fn count(&self, kind: EntityKind) -> Result<i64> {
            self.inner.count(kind).await
        }

        async fn count_dangling(&self, fk: &crate::entity::ForeignKey) -> Result<i64> {
            self.inner.count_dangling(fk).await
        }

        async fn duplicates(
            &self,
            field: &crate::entity::UniqueField,
        ) -> Result<Vec<crate::target::DuplicateValue>> {
            self.inner.duplicates(field).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn db_type(&self) -> &str {
            "memory"
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_cancelled_load_keeps_committed_counts() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let config = Config::from_yaml(&format!(
            "source:\n  path: ./unused\ntarget:\n  host: localhost\n  database: d\n  user: u\nmigration:\n  artifacts_dir: {}\n  batch_sizes:\n    account: 1\n",
            dir.path().display()
        ))
        .unwrap();
        let cancel = CancellationToken::new();
        let dest = Arc::new(CancelAfterFirstBatch {
            inner: MemoryDestination::new(),
            cancel: cancel.clone(),
        });
        let orchestrator = Orchestrator::with_collaborators(config, source(), dest.clone())
            .with_state_file(state_file.clone())
            .with_cancellation(cancel);

        let err = orchestrator.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert_eq!(dest.inner.count(EntityKind::Account).await.unwrap(), 1);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        let account = report["payload"]["kinds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kind"] == "account")
            .unwrap();
        assert_eq!(account["load"]["succeeded"], 1);
        assert_eq!(account["load"]["cancelled"], true);

        let state = MigrationState::load(&state_file).unwrap();
        let account_state = &state.kinds[&EntityKind::Account];
        assert_eq!(account_state.loaded, 1);
        assert!(!state.is_kind_completed(EntityKind::Account));
        assert!(!state.is_kind_completed(EntityKind::OvertimeRequest));
    }

    #[tokio::test]
    async fn test_offline_orchestrator_plans_but_cannot_load() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::build(config(&dir), source(), None);

        let dry = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let summary = orchestrator.run(&dry).await.unwrap();
        assert_eq!(summary.records_loaded(), 3);
        assert!(summary.validation.is_none());

        let err = orchestrator
            .run_phase(Phase::Load, &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_health_check_reports_each_side() {
        let dir = TempDir::new().unwrap();
        let dest = Arc::new(MemoryDestination::new());
        dest.fail_checks(true);
        let orchestrator = Orchestrator::with_collaborators(config(&dir), source(), dest);

        let health = orchestrator.health_check().await.unwrap();
        assert!(health.source_connected);
        assert!(!health.target_connected);
        assert!(!health.healthy);
        assert_eq!(health.target_type, "memory");
    }
}
