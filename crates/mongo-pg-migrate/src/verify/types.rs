//! Types for post-load validation.

use crate::entity::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source vs destination row count for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountCheck {
    pub kind: EntityKind,
    /// `None` when the count could not be taken.
    pub source: Option<i64>,
    pub destination: Option<i64>,
    /// `destination - source`.
    pub difference: Option<i64>,
    pub matches: bool,
}

/// Rows whose foreign key points at a missing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    /// e.g. `overtime_requests.employee_id -> accounts.id`
    pub relationship: String,
    pub violating_rows: i64,
}

/// A value shared by more than one row of a unique column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniquenessViolation {
    /// e.g. `accounts.email`
    pub field: String,
    pub value: String,
    pub occurrences: i64,
}

/// Result of validating a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub counts: Vec<CountCheck>,
    pub integrity_violations: Vec<IntegrityViolation>,
    pub uniqueness_violations: Vec<UniquenessViolation>,
    /// Every problem found, including checks that could not run.
    pub issues: Vec<String>,
    /// True only when every count matches and no other issue was found.
    pub valid: bool,
}

impl ValidationReport {
    pub(crate) fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            counts: Vec::new(),
            integrity_violations: Vec::new(),
            uniqueness_violations: Vec::new(),
            issues: Vec::new(),
            valid: true,
        }
    }

    pub(crate) fn add_issue(&mut self, issue: String) {
        self.issues.push(issue);
        self.valid = false;
    }

    pub fn count_for(&self, kind: EntityKind) -> Option<&CountCheck> {
        self.counts.iter().find(|c| c.kind == kind)
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}
