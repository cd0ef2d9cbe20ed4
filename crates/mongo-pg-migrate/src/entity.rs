//! The closed set of migrated entity kinds and their destination metadata.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One category of business record.
///
/// Declaration order is the load order: referenced kinds come before the
/// kinds that reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    OrganizationSettings,
    Account,
    OvertimeRequest,
    BalanceLedgerEntry,
    AuditEntry,
}

/// How a kind's rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// INSERT new rows, overwrite mutable fields of existing rows.
    Upsert,
    /// INSERT only; an existing id fails the batch.
    InsertOnly,
}

/// A destination foreign-key relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub kind: EntityKind,
    pub column: &'static str,
    pub references: EntityKind,
    pub required: bool,
}

impl ForeignKey {
    /// Human-readable relationship name, e.g. `overtime_requests.employee_id -> accounts.id`.
    pub fn describe(&self) -> String {
        format!(
            "{}.{} -> {}.id",
            self.kind.table_name(),
            self.column,
            self.references.table_name()
        )
    }
}

/// A destination column declared unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueField {
    pub kind: EntityKind,
    pub column: &'static str,
}

impl UniqueField {
    pub fn describe(&self) -> String {
        format!("{}.{}", self.kind.table_name(), self.column)
    }
}

const FOREIGN_KEYS: &[ForeignKey] = &[
    ForeignKey {
        kind: EntityKind::OvertimeRequest,
        column: "employee_id",
        references: EntityKind::Account,
        required: true,
    },
    ForeignKey {
        kind: EntityKind::OvertimeRequest,
        column: "approver_id",
        references: EntityKind::Account,
        required: false,
    },
    ForeignKey {
        kind: EntityKind::BalanceLedgerEntry,
        column: "account_id",
        references: EntityKind::Account,
        required: true,
    },
    ForeignKey {
        kind: EntityKind::BalanceLedgerEntry,
        column: "overtime_request_id",
        references: EntityKind::OvertimeRequest,
        required: false,
    },
    ForeignKey {
        kind: EntityKind::AuditEntry,
        column: "actor_id",
        references: EntityKind::Account,
        required: false,
    },
];

const UNIQUE_FIELDS: &[UniqueField] = &[
    UniqueField {
        kind: EntityKind::Account,
        column: "email",
    },
    UniqueField {
        kind: EntityKind::OrganizationSettings,
        column: "name",
    },
];

impl EntityKind {
    /// All kinds in load order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::OrganizationSettings,
        EntityKind::Account,
        EntityKind::OvertimeRequest,
        EntityKind::BalanceLedgerEntry,
        EntityKind::AuditEntry,
    ];

    /// Stable name used in config, artifacts and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::OrganizationSettings => "organization_settings",
            EntityKind::Account => "account",
            EntityKind::OvertimeRequest => "overtime_request",
            EntityKind::BalanceLedgerEntry => "balance_ledger_entry",
            EntityKind::AuditEntry => "audit_entry",
        }
    }

    /// Destination table.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::OrganizationSettings => "organization_settings",
            EntityKind::Account => "accounts",
            EntityKind::OvertimeRequest => "overtime_requests",
            EntityKind::BalanceLedgerEntry => "balance_ledger_entries",
            EntityKind::AuditEntry => "audit_entries",
        }
    }

    /// Default source collection name.
    pub fn default_collection(&self) -> &'static str {
        match self {
            EntityKind::OrganizationSettings => "organizationsettings",
            EntityKind::Account => "users",
            EntityKind::OvertimeRequest => "overtimerequests",
            EntityKind::BalanceLedgerEntry => "balanceledgerentries",
            EntityKind::AuditEntry => "auditentries",
        }
    }

    /// Default rows per transactional batch. Small for kinds carrying binary
    /// payloads, large for append-only logs.
    pub fn default_batch_size(&self) -> usize {
        match self {
            EntityKind::OrganizationSettings => 10,
            EntityKind::Account => 500,
            EntityKind::OvertimeRequest => 500,
            EntityKind::BalanceLedgerEntry => 1_000,
            EntityKind::AuditEntry => 2_000,
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            EntityKind::AuditEntry => WriteMode::InsertOnly,
            _ => WriteMode::Upsert,
        }
    }

    /// Foreign keys declared on this kind's table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &'static ForeignKey> + '_ {
        FOREIGN_KEYS.iter().filter(move |fk| fk.kind == *self)
    }

    /// Unique columns declared on this kind's table.
    pub fn unique_fields(&self) -> impl Iterator<Item = &'static UniqueField> + '_ {
        UNIQUE_FIELDS.iter().filter(move |u| u.kind == *self)
    }

    /// Kinds this kind references through foreign keys.
    pub fn dependencies(&self) -> Vec<EntityKind> {
        let mut deps: Vec<EntityKind> = self.foreign_keys().map(|fk| fk.references).collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Every declared foreign key.
pub fn all_foreign_keys() -> &'static [ForeignKey] {
    FOREIGN_KEYS
}

/// Every declared unique field.
pub fn all_unique_fields() -> &'static [UniqueField] {
    UNIQUE_FIELDS
}

/// Sort `kinds` into load order and drop duplicates.
pub fn load_order(kinds: &[EntityKind]) -> Vec<EntityKind> {
    let mut ordered = kinds.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized || k.table_name() == normalized)
            .ok_or_else(|| MigrateError::UnknownKind(s.to_string()))
    }
}
