//! Identity remapping between source ObjectIds and destination UUIDs.
//!
//! The [`IdentityMapper`] is the only writer of an [`IdentityMap`]. Once the
//! mapping phase finishes the map is persisted and every later phase receives
//! it by shared reference.

use crate::document::{canonical_id, Document};
use crate::entity::EntityKind;
use crate::validators::is_valid_object_id;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-kind table of source identifier -> destination identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityMap {
    kinds: BTreeMap<EntityKind, BTreeMap<String, Uuid>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination identifier for `source_id` of `kind`.
    pub fn resolve(&self, kind: EntityKind, source_id: &str) -> Option<Uuid> {
        self.kinds.get(&kind)?.get(source_id).copied()
    }

    pub fn contains(&self, kind: EntityKind, source_id: &str) -> bool {
        self.resolve(kind, source_id).is_some()
    }

    /// Number of mapped identifiers for `kind`.
    pub fn len_for(&self, kind: EntityKind) -> usize {
        self.kinds.get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    /// Total mapped identifiers across all kinds.
    pub fn len(&self) -> usize {
        self.kinds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries for `kind`, ordered by source identifier.
    pub fn entries(&self, kind: EntityKind) -> impl Iterator<Item = (&str, Uuid)> + '_ {
        self.kinds
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), *v)))
    }

    /// Record `source_id -> dest_id` unless `source_id` is already mapped.
    /// Returns the identifier now associated with `source_id`.
    fn insert_if_absent(&mut self, kind: EntityKind, source_id: &str, dest_id: Uuid) -> Uuid {
        *self
            .kinds
            .entry(kind)
            .or_default()
            .entry(source_id.to_string())
            .or_insert(dest_id)
    }

    fn ensure_kind(&mut self, kind: EntityKind) {
        self.kinds.entry(kind).or_default();
    }
}

/// Outcome of mapping one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindMappingReport {
    /// Documents examined.
    pub documents: usize,
    /// Identifiers that received a fresh destination identifier.
    pub generated: usize,
    /// Identifiers already present in a previously persisted mapping.
    pub reused: usize,
    /// Documents without a usable `_id`.
    pub skipped: usize,
    /// Non-fatal identifier problems.
    pub warnings: Vec<String>,
    /// Set when the kind's documents could not be read.
    pub error: Option<String>,
}

/// Outcome of the mapping phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingReport {
    pub kinds: BTreeMap<EntityKind, KindMappingReport>,
}

impl MappingReport {
    pub fn warnings(&self) -> usize {
        self.kinds.values().map(|k| k.warnings.len()).sum()
    }

    pub fn failed_kinds(&self) -> Vec<EntityKind> {
        self.kinds
            .iter()
            .filter(|(_, r)| r.error.is_some())
            .map(|(k, _)| *k)
            .collect()
    }
}

/// Builds an [`IdentityMap`] in a single forward pass over exported documents.
#[derive(Debug, Default)]
pub struct IdentityMapper {
    map: IdentityMap,
    report: MappingReport,
}

impl IdentityMapper {
    /// Start from an empty mapping; every identifier gets a new UUID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously persisted mapping. Known identifiers keep
    /// their destination identifier; only newly seen ones are generated.
    pub fn from_existing(map: IdentityMap) -> Self {
        Self {
            map,
            report: MappingReport::default(),
        }
    }

    /// Map every document identifier of `kind`.
    pub fn add_documents(&mut self, kind: EntityKind, docs: &[Document]) -> &KindMappingReport {
        self.map.ensure_kind(kind);
        let mut report = KindMappingReport {
            documents: docs.len(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::with_capacity(docs.len());

        for (index, doc) in docs.iter().enumerate() {
            let Some(source_id) = doc.get("_id").and_then(canonical_id) else {
                report.skipped += 1;
                report
                    .warnings
                    .push(format!("document {} has no usable _id; not mapped", index));
                continue;
            };

            if !seen.insert(source_id.clone()) {
                report
                    .warnings
                    .push(format!("duplicate _id '{}' at document {}", source_id, index));
                continue;
            }

            if !is_valid_object_id(&source_id) {
                report.warnings.push(format!(
                    "_id '{}' at document {} is not an ObjectId; mapped anyway",
                    source_id, index
                ));
            }

            if self.map.contains(kind, &source_id) {
                report.reused += 1;
            } else {
                self.map.insert_if_absent(kind, &source_id, Uuid::new_v4());
                report.generated += 1;
            }
        }

        for w in &report.warnings {
            warn!("{}: {}", kind, w);
        }
        info!(
            "{}: mapped {} identifiers ({} new, {} reused, {} skipped)",
            kind,
            report.generated + report.reused,
            report.generated,
            report.reused,
            report.skipped
        );

        self.report.kinds.insert(kind, report);
        &self.report.kinds[&kind]
    }

    /// Record that `kind` could not be read. Its sub-mapping stays as it was
    /// (empty unless seeded from a previous run).
    pub fn record_failure(&mut self, kind: EntityKind, error: impl Into<String>) {
        let error = error.into();
        warn!("{}: mapping skipped: {}", kind, error);
        self.map.ensure_kind(kind);
        self.report.kinds.insert(
            kind,
            KindMappingReport {
                error: Some(error),
                ..Default::default()
            },
        );
    }

    /// Finish the mapping phase.
    pub fn finish(self) -> (IdentityMap, MappingReport) {
        (self.map, self.report)
    }
}

/// Map all `docs`, optionally seeded with an existing mapping.
pub fn build_mapping<'a, I>(docs: I, existing: Option<IdentityMap>) -> (IdentityMap, MappingReport)
where
    I: IntoIterator<Item = (EntityKind, &'a [Document])>,
{
    let mut mapper = match existing {
        Some(map) => IdentityMapper::from_existing(map),
        None => IdentityMapper::new(),
    };
    for (kind, kind_docs) in docs {
        mapper.add_documents(kind, kind_docs);
    }
    mapper.finish()
}
