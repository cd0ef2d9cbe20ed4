//! Destination-shaped records, one struct per entity kind.
//!
//! Records are the transport form persisted between the transform and load
//! phases: timestamps are ISO-8601 strings and binary payloads are base64.
//! [`TransformedRecord::columns`] converts them to typed column values right
//! before they are written.

use crate::document::decode_base64;
use crate::entity::EntityKind;
use crate::target::{SqlNullType, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub source_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub department: String,
    pub password_hash: String,
    pub active: bool,
    pub hourly_rate: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvertimeRequestRecord {
    pub id: Uuid,
    pub source_id: String,
    pub employee_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub hours: f64,
    pub reason: String,
    pub status: String,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceLedgerEntryRecord {
    pub id: Uuid,
    pub source_id: String,
    pub account_id: Uuid,
    pub overtime_request_id: Option<Uuid>,
    pub entry_type: String,
    pub hours: f64,
    pub effective_date: String,
    pub note: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryRecord {
    pub id: Uuid,
    pub source_id: String,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSettingsRecord {
    pub id: Uuid,
    pub source_id: String,
    pub name: String,
    pub timezone: String,
    pub week_start: String,
    pub overtime_multiplier: f64,
    /// Base64 while in transit between phases.
    pub logo: Option<String>,
    pub logo_mime_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A validated record ready for loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformedRecord {
    OrganizationSettings(OrganizationSettingsRecord),
    Account(AccountRecord),
    OvertimeRequest(OvertimeRequestRecord),
    BalanceLedgerEntry(BalanceLedgerEntryRecord),
    AuditEntry(AuditEntryRecord),
}

/// A foreign-key value carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceValue {
    pub column: &'static str,
    pub references: EntityKind,
    pub id: Option<Uuid>,
}

impl TransformedRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            TransformedRecord::OrganizationSettings(_) => EntityKind::OrganizationSettings,
            TransformedRecord::Account(_) => EntityKind::Account,
            TransformedRecord::OvertimeRequest(_) => EntityKind::OvertimeRequest,
            TransformedRecord::BalanceLedgerEntry(_) => EntityKind::BalanceLedgerEntry,
            TransformedRecord::AuditEntry(_) => EntityKind::AuditEntry,
        }
    }

    /// Destination primary key.
    pub fn id(&self) -> Uuid {
        match self {
            TransformedRecord::OrganizationSettings(r) => r.id,
            TransformedRecord::Account(r) => r.id,
            TransformedRecord::OvertimeRequest(r) => r.id,
            TransformedRecord::BalanceLedgerEntry(r) => r.id,
            TransformedRecord::AuditEntry(r) => r.id,
        }
    }

    /// Canonical source identifier the record was built from.
    pub fn source_id(&self) -> &str {
        match self {
            TransformedRecord::OrganizationSettings(r) => &r.source_id,
            TransformedRecord::Account(r) => &r.source_id,
            TransformedRecord::OvertimeRequest(r) => &r.source_id,
            TransformedRecord::BalanceLedgerEntry(r) => &r.source_id,
            TransformedRecord::AuditEntry(r) => &r.source_id,
        }
    }

    pub fn created_at(&self) -> &str {
        match self {
            TransformedRecord::OrganizationSettings(r) => &r.created_at,
            TransformedRecord::Account(r) => &r.created_at,
            TransformedRecord::OvertimeRequest(r) => &r.created_at,
            TransformedRecord::BalanceLedgerEntry(r) => &r.created_at,
            TransformedRecord::AuditEntry(r) => &r.created_at,
        }
    }

    pub(crate) fn set_created_at(&mut self, created_at: String) {
        match self {
            TransformedRecord::OrganizationSettings(r) => r.created_at = created_at,
            TransformedRecord::Account(r) => r.created_at = created_at,
            TransformedRecord::OvertimeRequest(r) => r.created_at = created_at,
            TransformedRecord::BalanceLedgerEntry(r) => r.created_at = created_at,
            TransformedRecord::AuditEntry(r) => r.created_at = created_at,
        }
    }

    /// Foreign-key values, one per declared relationship of the kind.
    pub fn references(&self) -> Vec<ReferenceValue> {
        let reference = |column, references, id| ReferenceValue {
            column,
            references,
            id,
        };
        match self {
            TransformedRecord::OvertimeRequest(r) => vec![
                reference("employee_id", EntityKind::Account, Some(r.employee_id)),
                reference("approver_id", EntityKind::Account, r.approver_id),
            ],
            TransformedRecord::BalanceLedgerEntry(r) => vec![
                reference("account_id", EntityKind::Account, Some(r.account_id)),
                reference(
                    "overtime_request_id",
                    EntityKind::OvertimeRequest,
                    r.overtime_request_id,
                ),
            ],
            TransformedRecord::AuditEntry(r) => {
                vec![reference("actor_id", EntityKind::Account, r.actor_id)]
            }
            TransformedRecord::OrganizationSettings(_) | TransformedRecord::Account(_) => {
                Vec::new()
            }
        }
    }

    /// Column names in write order; `id` first.
    pub fn column_names(kind: EntityKind) -> &'static [&'static str] {
        match kind {
            EntityKind::OrganizationSettings => &[
                "id",
                "name",
                "timezone",
                "week_start",
                "overtime_multiplier",
                "logo",
                "logo_mime_type",
                "created_at",
                "updated_at",
            ],
            EntityKind::Account => &[
                "id",
                "email",
                "name",
                "role",
                "department",
                "password_hash",
                "active",
                "hourly_rate",
                "created_at",
                "updated_at",
            ],
            EntityKind::OvertimeRequest => &[
                "id",
                "employee_id",
                "approver_id",
                "date",
                "start_time",
                "end_time",
                "hours",
                "reason",
                "status",
                "category",
                "created_at",
                "updated_at",
            ],
            EntityKind::BalanceLedgerEntry => &[
                "id",
                "account_id",
                "overtime_request_id",
                "entry_type",
                "hours",
                "effective_date",
                "note",
                "created_at",
                "updated_at",
            ],
            EntityKind::AuditEntry => &[
                "id",
                "actor_id",
                "action",
                "entity_type",
                "entity_id",
                "details",
                "created_at",
            ],
        }
    }

    /// Typed column values in [`Self::column_names`] order.
    ///
    /// This is where transit encodings are undone: base64 payloads become
    /// bytes and ISO-8601 strings become dates and timestamps.
    pub fn values(&self) -> Result<Vec<SqlValue>, String> {
        let values = match self {
            TransformedRecord::OrganizationSettings(r) => vec![
                SqlValue::Uuid(r.id),
                SqlValue::String(r.name.clone()),
                SqlValue::String(r.timezone.clone()),
                SqlValue::String(r.week_start.clone()),
                SqlValue::F64(r.overtime_multiplier),
                match &r.logo {
                    Some(encoded) => SqlValue::Bytes(decode_base64(encoded)?),
                    None => SqlValue::Null(SqlNullType::Bytes),
                },
                opt_string(&r.logo_mime_type),
                timestamp(&r.created_at)?,
                timestamp(&r.updated_at)?,
            ],
            TransformedRecord::Account(r) => vec![
                SqlValue::Uuid(r.id),
                SqlValue::String(r.email.clone()),
                SqlValue::String(r.name.clone()),
                SqlValue::String(r.role.clone()),
                SqlValue::String(r.department.clone()),
                SqlValue::String(r.password_hash.clone()),
                SqlValue::Bool(r.active),
                SqlValue::F64(r.hourly_rate),
                timestamp(&r.created_at)?,
                timestamp(&r.updated_at)?,
            ],
            TransformedRecord::OvertimeRequest(r) => vec![
                SqlValue::Uuid(r.id),
                SqlValue::Uuid(r.employee_id),
                opt_uuid(r.approver_id),
                date(&r.date)?,
                time(&r.start_time)?,
                time(&r.end_time)?,
                SqlValue::F64(r.hours),
                SqlValue::String(r.reason.clone()),
                SqlValue::String(r.status.clone()),
                SqlValue::String(r.category.clone()),
                timestamp(&r.created_at)?,
                timestamp(&r.updated_at)?,
            ],
            TransformedRecord::BalanceLedgerEntry(r) => vec![
                SqlValue::Uuid(r.id),
                SqlValue::Uuid(r.account_id),
                opt_uuid(r.overtime_request_id),
                SqlValue::String(r.entry_type.clone()),
                SqlValue::F64(r.hours),
                date(&r.effective_date)?,
                SqlValue::String(r.note.clone()),
                timestamp(&r.created_at)?,
                timestamp(&r.updated_at)?,
            ],
            TransformedRecord::AuditEntry(r) => vec![
                SqlValue::Uuid(r.id),
                opt_uuid(r.actor_id),
                SqlValue::String(r.action.clone()),
                SqlValue::String(r.entity_type.clone()),
                opt_string(&r.entity_id),
                SqlValue::Json(r.details.clone()),
                timestamp(&r.created_at)?,
            ],
        };
        Ok(values)
    }

    /// Column name/value pairs.
    pub fn columns(&self) -> Result<Vec<(&'static str, SqlValue)>, String> {
        Ok(Self::column_names(self.kind())
            .iter()
            .copied()
            .zip(self.values()?)
            .collect())
    }
}

fn opt_uuid(id: Option<Uuid>) -> SqlValue {
    id.map(SqlValue::Uuid)
        .unwrap_or(SqlValue::Null(SqlNullType::Uuid))
}

fn opt_string(s: &Option<String>) -> SqlValue {
    s.clone()
        .map(SqlValue::String)
        .unwrap_or(SqlValue::Null(SqlNullType::String))
}

fn timestamp(s: &str) -> Result<SqlValue, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| SqlValue::Timestamp(dt.with_timezone(&Utc)))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}

fn date(s: &str) -> Result<SqlValue, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(SqlValue::Date)
        .map_err(|e| format!("invalid date '{}': {}", s, e))
}

fn time(s: &str) -> Result<SqlValue, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map(SqlValue::Time)
        .map_err(|e| format!("invalid time '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(logo: Option<&str>) -> TransformedRecord {
        TransformedRecord::OrganizationSettings(OrganizationSettingsRecord {
            id: Uuid::new_v4(),
            source_id: "507f1f77bcf86cd799439011".into(),
            name: "Acme".into(),
            timezone: "UTC".into(),
            week_start: "monday".into(),
            overtime_multiplier: 1.5,
            logo: logo.map(String::from),
            logo_mime_type: Some("image/png".into()),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-02T00:00:00.000Z".into(),
        })
    }

    #[test]
    fn test_values_match_column_names() {
        let record = settings(None);
        assert_eq!(
            record.values().unwrap().len(),
            TransformedRecord::column_names(record.kind()).len()
        );
    }

    #[test]
    fn test_logo_is_decoded_to_bytes() {
        let columns = settings(Some("iVBORw==")).columns().unwrap();
        let logo = columns.iter().find(|(c, _)| *c == "logo").unwrap();
        assert!(matches!(&logo.1, SqlValue::Bytes(b) if b == &vec![137, 80, 78, 71]));
    }

    #[test]
    fn test_corrupt_logo_fails_conversion() {
        assert!(settings(Some("%%%")).values().is_err());
    }

    #[test]
    fn test_serialized_form_is_tagged_by_kind() {
        let json = serde_json::to_value(settings(None)).unwrap();
        assert_eq!(json["kind"], "organization_settings");
        let back: TransformedRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EntityKind::OrganizationSettings);
    }

    #[test]
    fn test_references_follow_declared_foreign_keys() {
        for kind in EntityKind::ALL {
            let declared: Vec<&str> = kind.foreign_keys().map(|fk| fk.column).collect();
            let columns = TransformedRecord::column_names(kind);
            for column in declared {
                assert!(columns.contains(&column), "{kind} lacks column {column}");
            }
        }
    }
}
