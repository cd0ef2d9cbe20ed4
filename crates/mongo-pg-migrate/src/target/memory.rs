//! In-memory destination.
//!
//! Tables live in a mutex-guarded map. Each `write_batch` stages a copy of
//! the kind's table, applies every record, checks primary-key and unique
//! constraints, and only then swaps the copy in. Foreign keys are not
//! enforced, so dangling references can be produced for validator tests.

use super::{Destination, DuplicateValue, SqlValue};
use crate::entity::{EntityKind, ForeignKey, UniqueField, WriteMode};
use crate::error::{MigrateError, Result};
use crate::transform::TransformedRecord;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

type Table = BTreeMap<Uuid, TransformedRecord>;

#[derive(Default)]
struct Inner {
    tables: HashMap<EntityKind, Table>,
    fail_on: HashSet<String>,
    failing_checks: bool,
    transactions: usize,
}

#[derive(Default)]
pub struct MemoryDestination {
    inner: Mutex<Inner>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail any batch containing the record built from `source_id`.
    pub fn fail_on_source_id(&self, source_id: impl Into<String>) {
        self.lock().fail_on.insert(source_id.into());
    }

    /// Make counts and integrity checks fail.
    pub fn fail_checks(&self, failing: bool) {
        self.lock().failing_checks = failing;
    }

    /// Insert a row bypassing every constraint.
    pub fn insert_raw(&self, record: TransformedRecord) {
        self.lock()
            .tables
            .entry(record.kind())
            .or_default()
            .insert(record.id(), record);
    }

    /// Current rows of `kind`, ordered by id.
    pub fn rows(&self, kind: EntityKind) -> Vec<TransformedRecord> {
        self.lock()
            .tables
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, kind: EntityKind, id: Uuid) -> Option<TransformedRecord> {
        self.lock().tables.get(&kind)?.get(&id).cloned()
    }

    /// Number of transactions opened by `write_batch`.
    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }

    fn check_available(inner: &Inner) -> Result<()> {
        if inner.failing_checks {
            return Err(MigrateError::Validation(
                "memory destination query failed".into(),
            ));
        }
        Ok(())
    }
}

/// Text value of `column`, if the record has it and it is non-null.
fn column_text(record: &TransformedRecord, column: &str) -> Option<String> {
    let position = TransformedRecord::column_names(record.kind())
        .iter()
        .position(|c| *c == column)?;
    match record.values().ok()?.into_iter().nth(position)? {
        SqlValue::Null(_) => None,
        SqlValue::String(s) => Some(s),
        SqlValue::Uuid(u) => Some(u.to_string()),
        other => Some(format!("{:?}", other)),
    }
}

fn duplicates_in(table: &Table, column: &str) -> Vec<DuplicateValue> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for record in table.values() {
        if let Some(value) = column_text(record, column) {
            *counts.entry(value).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(value, occurrences)| DuplicateValue { value, occurrences })
        .collect()
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn write_batch(
        &self,
        kind: EntityKind,
        records: &[TransformedRecord],
        mode: WriteMode,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut inner = self.lock();
        inner.transactions += 1;
        let mut staged = inner.tables.get(&kind).cloned().unwrap_or_default();
        let mut in_batch: HashSet<Uuid> = HashSet::with_capacity(records.len());

        for record in records {
            // Matches PostgreSQL: one upsert statement cannot touch a row twice.
            if mode == WriteMode::Upsert && !in_batch.insert(record.id()) {
                return Err(MigrateError::load(
                    kind.as_str(),
                    format!(
                        "ON CONFLICT DO UPDATE command cannot affect row a second time: {}",
                        record.id()
                    ),
                ));
            }
            if inner.fail_on.contains(record.source_id()) {
                return Err(MigrateError::load(
                    kind.as_str(),
                    format!("injected failure for {}", record.source_id()),
                ));
            }
            record.values().map_err(|e| {
                MigrateError::Transform(format!("{} {}: {}", kind, record.source_id(), e))
            })?;

            let mut row = record.clone();
            match (staged.get(&record.id()), mode) {
                (Some(_), WriteMode::InsertOnly) => {
                    return Err(MigrateError::load(
                        kind.as_str(),
                        format!(
                            "duplicate key value violates primary key of {}: {}",
                            kind.table_name(),
                            record.id()
                        ),
                    ));
                }
                (Some(existing), WriteMode::Upsert) => {
                    row.set_created_at(existing.created_at().to_string());
                }
                (None, _) => {}
            }
            staged.insert(row.id(), row);
        }

        for field in kind.unique_fields() {
            if let Some(dup) = duplicates_in(&staged, field.column).first() {
                return Err(MigrateError::load(
                    kind.as_str(),
                    format!(
                        "duplicate key value violates unique constraint on {}: {}",
                        field.describe(),
                        dup.value
                    ),
                ));
            }
        }

        inner.tables.insert(kind, staged);
        Ok(records.len() as u64)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner.tables.get(&kind).map(|t| t.len() as i64).unwrap_or(0))
    }

    async fn count_dangling(&self, fk: &ForeignKey) -> Result<i64> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        let empty = Table::new();
        let parents = inner.tables.get(&fk.references).unwrap_or(&empty);
        let dangling = inner
            .tables
            .get(&fk.kind)
            .unwrap_or(&empty)
            .values()
            .flat_map(|r| r.references())
            .filter(|reference| reference.column == fk.column)
            .filter_map(|reference| reference.id)
            .filter(|id| !parents.contains_key(id))
            .count();
        Ok(dangling as i64)
    }

    async fn duplicates(&self, field: &UniqueField) -> Result<Vec<DuplicateValue>> {
        let inner = self.lock();
        Self::check_available(&inner)?;
        Ok(inner
            .tables
            .get(&field.kind)
            .map(|t| duplicates_in(t, field.column))
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Self::check_available(&self.lock())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::AccountRecord;

    fn account(source_id: &str, email: &str, updated_at: &str) -> TransformedRecord {
        TransformedRecord::Account(AccountRecord {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            email: email.into(),
            name: String::new(),
            role: "employee".into(),
            department: String::new(),
            password_hash: String::new(),
            active: true,
            hourly_rate: 0.0,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: updated_at.into(),
        })
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_table_untouched() {
        let dest = MemoryDestination::new();
        dest.fail_on_source_id("b");
        let batch = vec![
            account("a", "a@example.com", "2024-01-01T00:00:00.000Z"),
            account("b", "b@example.com", "2024-01-01T00:00:00.000Z"),
        ];
        assert!(dest
            .write_batch(EntityKind::Account, &batch, WriteMode::Upsert)
            .await
            .is_err());
        assert_eq!(dest.count(EntityKind::Account).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_created_at_and_takes_new_values() {
        let dest = MemoryDestination::new();
        let first = account("a", "a@example.com", "2024-01-01T00:00:00.000Z");
        dest.write_batch(EntityKind::Account, &[first.clone()], WriteMode::Upsert)
            .await
            .unwrap();

        let TransformedRecord::Account(mut second) = first.clone() else {
            unreachable!()
        };
        second.created_at = "2030-01-01T00:00:00.000Z".into();
        second.updated_at = "2024-06-01T00:00:00.000Z".into();
        dest.write_batch(
            EntityKind::Account,
            &[TransformedRecord::Account(second)],
            WriteMode::Upsert,
        )
        .await
        .unwrap();

        let TransformedRecord::Account(stored) =
            dest.get(EntityKind::Account, first.id()).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(stored.created_at, "2024-01-01T00:00:00.000Z");
        assert_eq!(stored.updated_at, "2024-06-01T00:00:00.000Z");
        assert_eq!(dest.count(EntityKind::Account).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_only_collision_fails() {
        let dest = MemoryDestination::new();
        let record = account("a", "a@example.com", "2024-01-01T00:00:00.000Z");
        dest.write_batch(EntityKind::Account, &[record.clone()], WriteMode::InsertOnly)
            .await
            .unwrap();
        assert!(dest
            .write_batch(EntityKind::Account, &[record], WriteMode::InsertOnly)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_upsert_batch_repeating_an_id_fails_whole_batch() {
        let dest = MemoryDestination::new();
        let first = account("42", "first@example.com", "2024-01-01T00:00:00.000Z");
        let TransformedRecord::Account(mut repeat) = first.clone() else {
            unreachable!()
        };
        repeat.email = "second@example.com".into();
        let batch = vec![
            account("a", "a@example.com", "2024-01-01T00:00:00.000Z"),
            first,
            TransformedRecord::Account(repeat),
        ];

        let err = dest
            .write_batch(EntityKind::Account, &batch, WriteMode::Upsert)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot affect row a second time"));
        assert_eq!(dest.count(EntityKind::Account).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_constraint_is_enforced() {
        let dest = MemoryDestination::new();
        let batch = vec![
            account("a", "same@example.com", "2024-01-01T00:00:00.000Z"),
            account("b", "same@example.com", "2024-01-01T00:00:00.000Z"),
        ];
        let err = dest
            .write_batch(EntityKind::Account, &batch, WriteMode::Upsert)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("accounts.email"));
    }

    #[tokio::test]
    async fn test_raw_rows_bypass_constraints() {
        let dest = MemoryDestination::new();
        dest.insert_raw(account("a", "same@example.com", "2024-01-01T00:00:00.000Z"));
        dest.insert_raw(account("b", "same@example.com", "2024-01-01T00:00:00.000Z"));
        let field = EntityKind::Account.unique_fields().next().unwrap();
        let dups = dest.duplicates(field).await.unwrap();
        assert_eq!(
            dups,
            vec![DuplicateValue {
                value: "same@example.com".into(),
                occurrences: 2
            }]
        );
    }
}
