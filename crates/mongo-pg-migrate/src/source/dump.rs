//! `mongoexport` dump directory reader.
//!
//! Each collection lives in `<path>/<collection>.json`, either as JSON Lines
//! (the `mongoexport` default) or as a single JSON array (`--jsonArray`).

use super::DocumentSource;
use crate::config::SourceConfig;
use crate::document::Document;
use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Documents read from an export directory.
pub struct DumpSource {
    root: PathBuf,
    collections: HashMap<EntityKind, String>,
}

impl DumpSource {
    /// Open a dump directory described by the source config.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        let root = PathBuf::from(&config.path);
        if !root.is_dir() {
            return Err(MigrateError::source(format!(
                "dump directory not found: {}",
                root.display()
            )));
        }

        let collections = EntityKind::ALL
            .iter()
            .map(|k| (*k, config.collection_for(*k)))
            .collect();

        info!("Opened source dump: {}", root.display());
        Ok(Self { root, collections })
    }

    /// Open a dump directory using default collection names.
    pub fn with_defaults(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            collections: EntityKind::ALL
                .iter()
                .map(|k| (*k, k.default_collection().to_string()))
                .collect(),
        }
    }

    fn collection_path(&self, kind: EntityKind) -> PathBuf {
        let name = self
            .collections
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_collection());
        self.root.join(format!("{}.json", name))
    }

    fn read_file(&self, kind: EntityKind) -> Result<Vec<Document>> {
        let path = self.collection_path(kind);
        if !path.exists() {
            debug!("{}: no export file at {}, treating as empty", kind, path.display());
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            MigrateError::source(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse_export(&content)
            .map_err(|e| MigrateError::source(format!("{}: {}", path.display(), e)))
    }
}

/// Parse `mongoexport` output in either JSON Lines or JSON array form.
pub(crate) fn parse_export(content: &str) -> std::result::Result<Vec<Document>, String> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {}", e))?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, v)| into_document(v).ok_or_else(|| format!("element {} is not an object", i)))
            .collect();
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value: Value = serde_json::from_str(line)
                .map_err(|e| format!("line {}: invalid JSON: {}", i + 1, e))?;
            into_document(value).ok_or_else(|| format!("line {}: not an object", i + 1))
        })
        .collect()
}

fn into_document(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[async_trait]
impl DocumentSource for DumpSource {
    async fn read_all(&self, kind: EntityKind) -> Result<Vec<Document>> {
        let docs = self.read_file(kind)?;
        debug!("{}: read {} documents", kind, docs.len());
        Ok(docs)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        Ok(self.read_file(kind)?.len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(MigrateError::source(format!(
                "dump directory not found: {}",
                self.root.display()
            )))
        }
    }

    fn source_type(&self) -> &str {
        "dump"
    }

    async fn close(&self) {}
}
