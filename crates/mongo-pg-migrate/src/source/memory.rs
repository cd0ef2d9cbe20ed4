//! In-memory document source.

use super::DocumentSource;
use crate::document::Document;
use crate::entity::EntityKind;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Documents held in memory, keyed by kind.
#[derive(Default)]
pub struct MemorySource {
    collections: RwLock<HashMap<EntityKind, Vec<Document>>>,
    unreadable: RwLock<HashSet<EntityKind>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a whole collection.
    pub fn with_documents(self, kind: EntityKind, docs: Vec<Document>) -> Self {
        self.set_documents(kind, docs);
        self
    }

    /// Replace the documents of `kind`.
    pub fn set_documents(&self, kind: EntityKind, docs: Vec<Document>) {
        if let Ok(mut collections) = self.collections.write() {
            collections.insert(kind, docs);
        }
    }

    /// Make reads of `kind` fail, simulating an unreadable collection.
    pub fn fail_reads(&self, kind: EntityKind) {
        if let Ok(mut unreadable) = self.unreadable.write() {
            unreadable.insert(kind);
        }
    }

    fn check_readable(&self, kind: EntityKind) -> Result<()> {
        let unreadable = self
            .unreadable
            .read()
            .map_err(|_| MigrateError::source("memory source lock poisoned"))?;
        if unreadable.contains(&kind) {
            return Err(MigrateError::source(format!("collection for {} is unreadable", kind)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn read_all(&self, kind: EntityKind) -> Result<Vec<Document>> {
        self.check_readable(kind)?;
        let collections = self
            .collections
            .read()
            .map_err(|_| MigrateError::source("memory source lock poisoned"))?;
        Ok(collections.get(&kind).cloned().unwrap_or_default())
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        Ok(self.read_all(kind).await?.len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn source_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
