//! Durable intermediate artifacts.
//!
//! Every phase reads its inputs from and writes its outputs to an
//! [`ArtifactStore`], so any phase can be re-run without repeating the
//! earlier ones. Layout under the artifacts directory:
//!
//! ```text
//! raw/<kind>.json           exported source documents
//! identity_map.json         source id -> destination id, per kind
//! transformed/<kind>.json   destination-shaped records
//! failures/<kind>.json      documents that failed transformation
//! report.json               summary of the last run
//! ```
//!
//! Each file is an envelope carrying a format version and a SHA-256 checksum
//! of its payload. Writes go to a temp file and are renamed into place.

use crate::document::Document;
use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMap;
use crate::transform::{TransformFailure, TransformedRecord};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

const IDENTITY_MAP: &str = "identity_map.json";
const REPORT: &str = "report.json";

const RAW: &str = "raw";
const TRANSFORMED: &str = "transformed";
const FAILURES: &str = "failures";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    /// Artifact category: `raw`, `identity_map`, `transformed`, `failures` or `report`.
    kind: String,
    generated_at: DateTime<Utc>,
    checksum: String,
    payload: Value,
}

fn checksum(payload: &Value) -> Result<String> {
    let content = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Directory-backed store of named, versioned blobs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn raw_path(kind: EntityKind) -> PathBuf {
        Path::new(RAW).join(format!("{}.json", kind))
    }

    fn transformed_path(kind: EntityKind) -> PathBuf {
        Path::new(TRANSFORMED).join(format!("{}.json", kind))
    }

    fn failures_path(kind: EntityKind) -> PathBuf {
        Path::new(FAILURES).join(format!("{}.json", kind))
    }

    fn write<T: Serialize>(&self, kind: &str, rel: &Path, payload: &T) -> Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_value(payload)?;
        let envelope = Envelope {
            format_version: FORMAT_VERSION,
            kind: kind.to_string(),
            generated_at: Utc::now(),
            checksum: checksum(&payload)?,
            payload,
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &path)?;

        debug!("Wrote artifact {}", path.display());
        Ok(path)
    }

    fn read<T: DeserializeOwned>(&self, kind: &str, rel: &Path) -> Result<T> {
        let path = self.root.join(rel);
        let name = rel.display().to_string();
        if !path.exists() {
            return Err(MigrateError::ArtifactMissing(path.display().to_string()));
        }

        let content = std::fs::read_to_string(&path)?;
        let envelope: Envelope = serde_json::from_str(&content)
            .map_err(|e| MigrateError::artifact(&name, format!("unreadable envelope: {}", e)))?;

        if envelope.format_version != FORMAT_VERSION {
            return Err(MigrateError::artifact(
                &name,
                format!(
                    "format version {} is not supported (expected {})",
                    envelope.format_version, FORMAT_VERSION
                ),
            ));
        }
        if envelope.kind != kind {
            return Err(MigrateError::artifact(
                &name,
                format!("holds a '{}' artifact, expected '{}'", envelope.kind, kind),
            ));
        }
        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(MigrateError::artifact(&name, "checksum mismatch"));
        }

        serde_json::from_value(envelope.payload)
            .map_err(|e| MigrateError::artifact(&name, format!("unexpected payload: {}", e)))
    }

    fn exists(&self, rel: &Path) -> bool {
        self.root.join(rel).exists()
    }

    pub fn save_raw(&self, kind: EntityKind, docs: &[Document]) -> Result<PathBuf> {
        self.write(RAW, &Self::raw_path(kind), &docs)
    }

    pub fn load_raw(&self, kind: EntityKind) -> Result<Vec<Document>> {
        self.read(RAW, &Self::raw_path(kind))
    }

    pub fn has_raw(&self, kind: EntityKind) -> bool {
        self.exists(&Self::raw_path(kind))
    }

    pub fn save_identity_map(&self, map: &IdentityMap) -> Result<PathBuf> {
        self.write("identity_map", Path::new(IDENTITY_MAP), map)
    }

    pub fn load_identity_map(&self) -> Result<IdentityMap> {
        self.read("identity_map", Path::new(IDENTITY_MAP))
    }

    /// Previously persisted mapping, if any.
    pub fn load_identity_map_if_present(&self) -> Result<Option<IdentityMap>> {
        if self.exists(Path::new(IDENTITY_MAP)) {
            self.load_identity_map().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn save_transformed(
        &self,
        kind: EntityKind,
        records: &[TransformedRecord],
    ) -> Result<PathBuf> {
        self.write(TRANSFORMED, &Self::transformed_path(kind), &records)
    }

    pub fn load_transformed(&self, kind: EntityKind) -> Result<Vec<TransformedRecord>> {
        self.read(TRANSFORMED, &Self::transformed_path(kind))
    }

    pub fn save_failures(&self, kind: EntityKind, failures: &[TransformFailure]) -> Result<PathBuf> {
        self.write(FAILURES, &Self::failures_path(kind), &failures)
    }

    pub fn load_failures(&self, kind: EntityKind) -> Result<Vec<TransformFailure>> {
        self.read(FAILURES, &Self::failures_path(kind))
    }

    pub fn save_report<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        self.write("report", Path::new(REPORT), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn docs() -> Vec<Document> {
        vec![json!({"_id": {"$oid": "507f1f77bcf86cd799439011"}, "email": "a@example.com"})
            .as_object()
            .cloned()
            .unwrap()]
    }

    #[test]
    fn test_raw_artifact_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(!store.has_raw(EntityKind::Account));

        store.save_raw(EntityKind::Account, &docs()).unwrap();
        assert!(store.has_raw(EntityKind::Account));
        assert_eq!(store.load_raw(EntityKind::Account).unwrap(), docs());
        assert!(dir.path().join("raw/account.json").exists());
    }

    #[test]
    fn test_missing_artifact_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.load_transformed(EntityKind::Account).unwrap_err();
        assert!(matches!(err, MigrateError::ArtifactMissing(_)));
        assert!(store.load_identity_map_if_present().unwrap().is_none());
    }

    #[test]
    fn test_tampered_artifact_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.save_raw(EntityKind::Account, &docs()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("a@example.com", "b@example.com")).unwrap();

        let err = store.load_raw(EntityKind::Account).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_unsupported_format_version() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.save_raw(EntityKind::Account, &docs()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"format_version\": 1", "\"format_version\": 99"))
            .unwrap();

        let err = store.load_raw(EntityKind::Account).unwrap_err();
        assert!(err.to_string().contains("format version 99"));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save_raw(EntityKind::Account, &docs()).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("raw"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_fractional_hours_survive_reload() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let docs: Vec<Document> = (1..=600)
            .map(|mins| {
                json!({"_id": mins, "hours": mins as f64 / 60.0})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();

        store.save_raw(EntityKind::OvertimeRequest, &docs).unwrap();
        let loaded = store.load_raw(EntityKind::OvertimeRequest).unwrap();
        assert_eq!(loaded, docs);
        assert_eq!(loaded[6]["hours"], json!(7.0 / 60.0));
    }

    #[test]
    fn test_envelope_records_artifact_kind() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.save_raw(EntityKind::Account, &docs()).unwrap();

        let envelope: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(envelope["kind"], "raw");

        // A raw file copied over the failures slot is rejected, not misread.
        std::fs::create_dir_all(dir.path().join("failures")).unwrap();
        std::fs::copy(&path, dir.path().join("failures/account.json")).unwrap();
        let err = store.load_failures(EntityKind::Account).unwrap_err();
        assert!(err.to_string().contains("expected 'failures'"));
    }
}
