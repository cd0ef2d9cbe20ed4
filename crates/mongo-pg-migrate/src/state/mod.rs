//! File-based run state for resume capability.

use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Migration state for resume capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Per-kind state.
    pub kinds: BTreeMap<EntityKind, KindState>,

    /// When the migration completed (if finished).
    pub completed_at: Option<DateTime<Utc>>,

    /// HMAC-SHA256 over the serialized state (excluding this field),
    /// keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithIssues,
    Failed,
    Cancelled,
}

/// Pipeline phase a kind last reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Export,
    Map,
    Transform,
    Load,
    Validate,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Per-kind state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindState {
    pub status: TaskStatus,
    pub phase: Phase,
    pub exported: usize,
    pub transformed: usize,
    pub transform_failures: usize,
    pub loaded: usize,
    pub failed_batches: usize,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for KindState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            phase: Phase::Export,
            exported: 0,
            transformed: 0,
            transform_failures: 0,
            loaded: 0,
            failed_batches: 0,
            completed_at: None,
            error: None,
        }
    }
}

impl MigrationState {
    /// Create a new migration state.
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            kinds: BTreeMap::new(),
            completed_at: None,
            hmac: None,
        }
    }

    /// Uses config_hash as HMAC key, so a state file only verifies against
    /// the configuration that produced it.
    fn compute_hmac(&self) -> Result<String> {
        let mut state_for_signing = self.clone();
        state_for_signing.hmac = None;

        let content = serde_json::to_string(&state_for_signing)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file, verifying its HMAC if present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)
            .map_err(|e| MigrateError::State(format!("State file is not valid: {}", e)))?;

        match &state.hmac {
            Some(stored) => {
                if stored != &state.compute_hmac()? {
                    return Err(MigrateError::State(
                        "State file integrity check failed: HMAC mismatch (possible tampering)"
                            .to_string(),
                    ));
                }
            }
            None => {
                tracing::warn!("State file has no HMAC signature, integrity cannot be verified");
            }
        }

        Ok(state)
    }

    /// Load state if the file exists.
    pub fn load_if_exists<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        if path.as_ref().exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state: {}", e)))?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindState {
        self.kinds.entry(kind).or_default()
    }

    /// True once `kind` was loaded with no failed batches.
    pub fn is_kind_completed(&self, kind: EntityKind) -> bool {
        self.kinds
            .get(&kind)
            .map(|k| k.status == TaskStatus::Completed)
            .unwrap_or(false)
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl KindState {
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.status = TaskStatus::InProgress;
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_state_save_load() {
        let mut state = MigrationState::new("test-run".into(), "abc123".into());
        state.kind_mut(EntityKind::Account).loaded = 42;
        state.kind_mut(EntityKind::Account).mark_completed();

        let file = NamedTempFile::new().unwrap();
        state.save(file.path()).unwrap();

        let loaded = MigrationState::load(file.path()).unwrap();
        assert_eq!(loaded.run_id, "test-run");
        assert_eq!(loaded.kinds[&EntityKind::Account].loaded, 42);
        assert!(loaded.is_kind_completed(EntityKind::Account));
        assert!(!loaded.is_kind_completed(EntityKind::AuditEntry));
    }

    #[test]
    fn test_config_validation() {
        let state = MigrationState::new("test-run".into(), "abc123".into());
        assert!(state.validate_config("abc123").is_ok());
        assert!(matches!(
            state.validate_config("different"),
            Err(MigrateError::ConfigChanged)
        ));
    }

    #[test]
    fn test_tampered_state_is_rejected() {
        let mut state = MigrationState::new("test-run".into(), "abc123".into());
        state.kind_mut(EntityKind::Account).loaded = 1;
        let file = NamedTempFile::new().unwrap();
        state.save(file.path()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        std::fs::write(file.path(), content.replace("\"loaded\": 1", "\"loaded\": 9")).unwrap();

        let err = MigrationState::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("HMAC mismatch"));
    }

    #[test]
    fn test_state_without_hmac_is_accepted() {
        let state = MigrationState::new("legacy".into(), "hash".into());
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(MigrationState::load(file.path()).unwrap().run_id, "legacy");
    }

    #[test]
    fn test_state_file_is_pretty_json() {
        let mut state = MigrationState::new("test".into(), "hash".into());
        let file = NamedTempFile::new().unwrap();
        state.save(file.path()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("\"run_id\""));
        assert!(content.contains("\"hmac\""));
    }

    #[test]
    fn test_failed_kind_is_not_completed() {
        let mut state = MigrationState::new("r".into(), "h".into());
        let kind = state.kind_mut(EntityKind::OvertimeRequest);
        kind.enter(Phase::Load);
        kind.mark_failed("2 batches failed");
        assert!(!state.is_kind_completed(EntityKind::OvertimeRequest));
        assert_eq!(
            state.kinds[&EntityKind::OvertimeRequest].error.as_deref(),
            Some("2 batches failed")
        );
    }
}
