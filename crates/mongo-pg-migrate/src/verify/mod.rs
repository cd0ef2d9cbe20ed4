//! Post-load validation.
//!
//! Three checks reconcile the destination against the source:
//!
//! - **Counts**: fresh source count vs destination row count per kind
//! - **Referential integrity**: rows whose non-null foreign key has no target
//! - **Uniqueness**: duplicated non-null values of unique columns
//!
//! A check that cannot run (query error, timeout) is itself an issue.

pub mod types;

pub use types::{CountCheck, IntegrityViolation, UniquenessViolation, ValidationReport};

use crate::entity::{all_foreign_keys, all_unique_fields, load_order, EntityKind};
use crate::error::{with_timeout, Result};
use crate::source::DocumentSource;
use crate::target::Destination;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reconciles the destination with the source after loading.
pub struct MigrationValidator {
    source: Arc<dyn DocumentSource>,
    destination: Arc<dyn Destination>,
    operation_timeout: Duration,
}

impl MigrationValidator {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        destination: Arc<dyn Destination>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            operation_timeout,
        }
    }

    /// Validate `kinds`. Integrity and uniqueness checks cover the
    /// relationships and columns declared on those kinds' tables.
    pub async fn validate(&self, kinds: &[EntityKind]) -> ValidationReport {
        let start = Instant::now();
        let kinds = load_order(kinds);
        let mut report = ValidationReport::new();
        info!("Validating {} entity kinds", kinds.len());

        for &kind in &kinds {
            self.check_count(kind, &mut report).await;
        }

        for fk in all_foreign_keys().iter().filter(|fk| kinds.contains(&fk.kind)) {
            let relationship = fk.describe();
            match self
                .timed(
                    format!("integrity check {}", relationship),
                    self.destination.count_dangling(fk),
                )
                .await
            {
                Ok(0) => debug!("{}: ok", relationship),
                Ok(n) => {
                    warn!("{}: {} rows reference a missing row", relationship, n);
                    report.add_issue(format!(
                        "{}: {} rows reference a missing row",
                        relationship, n
                    ));
                    report.integrity_violations.push(IntegrityViolation {
                        relationship,
                        violating_rows: n,
                    });
                }
                Err(e) => report.add_issue(format!("{}: check failed: {}", relationship, e)),
            }
        }

        for field in all_unique_fields().iter().filter(|u| kinds.contains(&u.kind)) {
            let name = field.describe();
            match self
                .timed(
                    format!("uniqueness check {}", name),
                    self.destination.duplicates(field),
                )
                .await
            {
                Ok(duplicates) => {
                    for dup in duplicates {
                        warn!("{}: '{}' occurs {} times", name, dup.value, dup.occurrences);
                        report.add_issue(format!(
                            "{}: '{}' occurs {} times",
                            name, dup.value, dup.occurrences
                        ));
                        report.uniqueness_violations.push(UniquenessViolation {
                            field: name.clone(),
                            value: dup.value,
                            occurrences: dup.occurrences,
                        });
                    }
                }
                Err(e) => report.add_issue(format!("{}: check failed: {}", name, e)),
            }
        }

        info!(
            "Validation finished in {:.1}s: {} ({} issues)",
            start.elapsed().as_secs_f64(),
            if report.valid { "valid" } else { "INVALID" },
            report.issues.len()
        );
        report
    }

    async fn check_count(&self, kind: EntityKind, report: &mut ValidationReport) {
        let source = self
            .timed(format!("source count {}", kind), self.source.count(kind))
            .await;
        let destination = self
            .timed(
                format!("destination count {}", kind),
                self.destination.count(kind),
            )
            .await;

        let (source, destination) = match (source, destination) {
            (Ok(s), Ok(d)) => (s, d),
            (s, d) => {
                for e in [s.err(), d.err()].into_iter().flatten() {
                    report.add_issue(format!("{}: count check failed: {}", kind, e));
                }
                report.counts.push(CountCheck {
                    kind,
                    source: None,
                    destination: None,
                    difference: None,
                    matches: false,
                });
                return;
            }
        };

        let difference = destination - source;
        let matches = difference == 0;
        if matches {
            debug!("{}: {} rows in source and destination", kind, source);
        } else {
            warn!(
                "{}: source={} destination={} difference={:+}",
                kind, source, destination, difference
            );
            report.add_issue(format!(
                "{}: count mismatch: source={} destination={} difference={:+}",
                kind, source, destination, difference
            ));
        }
        report.counts.push(CountCheck {
            kind,
            source: Some(source),
            destination: Some(destination),
            difference: Some(difference),
            matches,
        });
    }

    async fn timed<T, F>(&self, operation: String, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        with_timeout(self.operation_timeout, operation, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::target::MemoryDestination;
    use crate::transform::{AccountRecord, OvertimeRequestRecord, TransformedRecord};
    use serde_json::json;
    use uuid::Uuid;

    fn account(email: &str) -> TransformedRecord {
        TransformedRecord::Account(AccountRecord {
            id: Uuid::new_v4(),
            source_id: email.into(),
            email: email.into(),
            name: String::new(),
            role: "employee".into(),
            department: String::new(),
            password_hash: String::new(),
            active: true,
            hourly_rate: 0.0,
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        })
    }

    fn request(employee_id: Uuid) -> TransformedRecord {
        TransformedRecord::OvertimeRequest(OvertimeRequestRecord {
            id: Uuid::new_v4(),
            source_id: "r".into(),
            employee_id,
            approver_id: None,
            date: "2024-03-01".into(),
            start_time: "18:00".into(),
            end_time: "20:00".into(),
            hours: 2.0,
            reason: String::new(),
            status: "pending".into(),
            category: "regular".into(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        })
    }

    fn source_with_accounts(n: usize) -> Arc<MemorySource> {
        let docs = (0..n)
            .map(|i| json!({"_id": i}).as_object().cloned().unwrap())
            .collect();
        Arc::new(MemorySource::new().with_documents(EntityKind::Account, docs))
    }

    fn validator(source: Arc<MemorySource>, dest: Arc<MemoryDestination>) -> MigrationValidator {
        MigrationValidator::new(source, dest, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_matching_counts_are_valid() {
        let dest = Arc::new(MemoryDestination::new());
        dest.insert_raw(account("a@example.com"));
        let report = validator(source_with_accounts(1), dest)
            .validate(&[EntityKind::Account])
            .await;
        assert!(report.valid, "{:?}", report.issues);
        assert!(report.count_for(EntityKind::Account).unwrap().matches);
    }

    #[tokio::test]
    async fn test_count_mismatch_reports_signed_difference() {
        let dest = Arc::new(MemoryDestination::new());
        dest.insert_raw(account("a@example.com"));
        let report = validator(source_with_accounts(3), dest)
            .validate(&[EntityKind::Account])
            .await;
        assert!(!report.valid);
        let count = report.count_for(EntityKind::Account).unwrap();
        assert_eq!(count.source, Some(3));
        assert_eq!(count.destination, Some(1));
        assert_eq!(count.difference, Some(-2));
    }

    #[tokio::test]
    async fn test_single_dangling_row_is_one_integrity_issue() {
        let dest = Arc::new(MemoryDestination::new());
        dest.insert_raw(request(Uuid::new_v4()));
        let source = Arc::new(MemorySource::new().with_documents(
            EntityKind::OvertimeRequest,
            vec![json!({"_id": 1}).as_object().cloned().unwrap()],
        ));
        let report = validator(source, dest)
            .validate(&[EntityKind::Account, EntityKind::OvertimeRequest])
            .await;
        assert!(!report.valid);
        assert_eq!(
            report.integrity_violations,
            vec![IntegrityViolation {
                relationship: "overtime_requests.employee_id -> accounts.id".into(),
                violating_rows: 1,
            }]
        );
        assert_eq!(report.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_unique_value_is_reported() {
        let dest = Arc::new(MemoryDestination::new());
        dest.insert_raw(account("dup@example.com"));
        dest.insert_raw(account("dup@example.com"));
        let report = validator(source_with_accounts(2), dest)
            .validate(&[EntityKind::Account])
            .await;
        assert_eq!(report.uniqueness_violations.len(), 1);
        assert_eq!(report.uniqueness_violations[0].field, "accounts.email");
        assert_eq!(report.uniqueness_violations[0].occurrences, 2);
        assert!(!report.valid);
    }

    #[tokio::test]
    async fn test_failed_check_is_an_issue() {
        let dest = Arc::new(MemoryDestination::new());
        dest.fail_checks(true);
        let report = validator(source_with_accounts(0), dest)
            .validate(&[EntityKind::Account])
            .await;
        assert!(!report.valid);
        assert!(!report.count_for(EntityKind::Account).unwrap().matches);
        assert!(report.issues.iter().any(|i| i.contains("check failed")));
    }
}
