//! Document-to-record transformation.
//!
//! One rule per entity kind turns an untyped [`Document`] into a
//! [`TransformedRecord`]. Identifier fields are resolved through the
//! [`IdentityMap`] against the sub-mapping of the kind they point at.
//! Record-level problems come back as [`TransformError`] values so a bad
//! document never aborts its kind.

mod records;

pub use records::{
    AccountRecord, AuditEntryRecord, BalanceLedgerEntryRecord, OrganizationSettingsRecord,
    OvertimeRequestRecord, ReferenceValue, TransformedRecord,
};

use crate::document::{
    binary_field, bool_field, canonical_id, field, format_timestamp, id_field, number_field,
    parse_timestamp, relaxed, string_field, timestamp_field, Document, Timestamp,
};
use crate::entity::EntityKind;
use crate::identity::IdentityMap;
use crate::validators::{
    is_in_set, is_valid_date, is_valid_email, is_valid_time, ACCOUNT_ROLES, LEDGER_ENTRY_TYPES,
    REQUEST_CATEGORIES, REQUEST_STATUSES, WEEK_STARTS,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a single document was excluded from the output.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("document has no usable _id")]
    MissingId,

    #[error("_id '{0}' has no destination identifier in the identity map")]
    UnmappedId(String),

    #[error("_id '{0}' repeats an earlier document of this kind")]
    DuplicateId(String),

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("required reference '{field}' is missing")]
    MissingReference { field: &'static str },

    #[error("required reference '{field}' -> {kind} '{id}' does not resolve")]
    UnresolvedReference {
        field: &'static str,
        kind: EntityKind,
        id: String,
    },

    #[error("invalid email '{0}'")]
    InvalidEmail(String),

    #[error("field '{field}' is not a YYYY-MM-DD date: {value}")]
    InvalidDate { field: &'static str, value: String },

    #[error("field '{field}' is not an HH:MM time: {value}")]
    InvalidTime { field: &'static str, value: String },
}

/// A successfully transformed document and its soft defects.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub record: TransformedRecord,
    pub warnings: Vec<String>,
}

/// A document that failed transformation, kept with its original content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformFailure {
    /// Position of the document in the exported collection.
    pub index: usize,
    pub error: String,
    pub document: Document,
}

/// Result of transforming every document of one kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub records: Vec<TransformedRecord>,
    pub failures: Vec<TransformFailure>,
    pub warnings: Vec<String>,
}

/// Transform every document of `kind`, using the current time as the
/// fallback for unparseable timestamps.
pub fn transform_all(kind: EntityKind, docs: &[Document], map: &IdentityMap) -> TransformOutput {
    transform_all_at(kind, docs, map, Utc::now())
}

/// Transform every document of `kind` with an explicit execution time.
pub fn transform_all_at(
    kind: EntityKind,
    docs: &[Document],
    map: &IdentityMap,
    now: DateTime<Utc>,
) -> TransformOutput {
    let mut output = TransformOutput::default();
    // One row per destination id; a repeat would fail its whole batch on load.
    let mut seen: HashSet<Uuid> = HashSet::with_capacity(docs.len());

    for (index, doc) in docs.iter().enumerate() {
        let result = transform_document(kind, doc, map, now).and_then(|t| {
            if seen.insert(t.record.id()) {
                Ok(t)
            } else {
                Err(TransformError::DuplicateId(t.record.source_id().to_string()))
            }
        });
        match result {
            Ok(t) => {
                output.warnings.extend(
                    t.warnings
                        .into_iter()
                        .map(|w| format!("document {} ({}): {}", index, t.record.source_id(), w)),
                );
                output.records.push(t.record);
            }
            Err(e) => {
                warn!("{}: document {} rejected: {}", kind, index, e);
                output.failures.push(TransformFailure {
                    index,
                    error: e.to_string(),
                    document: doc.clone(),
                });
            }
        }
    }

    info!(
        "{}: transformed {} of {} documents ({} failed, {} warnings)",
        kind,
        output.records.len(),
        docs.len(),
        output.failures.len(),
        output.warnings.len()
    );
    output
}

/// Transform one document of `kind`.
pub fn transform_document(
    kind: EntityKind,
    doc: &Document,
    map: &IdentityMap,
    now: DateTime<Utc>,
) -> Result<Transformed, TransformError> {
    let mut ctx = Context {
        kind,
        doc,
        map,
        now,
        warnings: Vec::new(),
    };
    let record = match kind {
        EntityKind::OrganizationSettings => organization_settings(&mut ctx)?,
        EntityKind::Account => account(&mut ctx)?,
        EntityKind::OvertimeRequest => overtime_request(&mut ctx)?,
        EntityKind::BalanceLedgerEntry => balance_ledger_entry(&mut ctx)?,
        EntityKind::AuditEntry => audit_entry(&mut ctx)?,
    };
    Ok(Transformed {
        record,
        warnings: ctx.warnings,
    })
}

/// Per-document field access with warning collection.
struct Context<'a> {
    kind: EntityKind,
    doc: &'a Document,
    map: &'a IdentityMap,
    now: DateTime<Utc>,
    warnings: Vec<String>,
}

impl Context<'_> {
    /// The document's own canonical id and its destination identifier.
    fn own_id(&self) -> Result<(String, Uuid), TransformError> {
        let source_id = id_field(self.doc, &["_id"]).ok_or(TransformError::MissingId)?;
        match self.map.resolve(self.kind, &source_id) {
            Some(id) => Ok((source_id, id)),
            None => Err(TransformError::UnmappedId(source_id)),
        }
    }

    fn required_ref(
        &self,
        column: &'static str,
        names: &[&str],
        target: EntityKind,
    ) -> Result<Uuid, TransformError> {
        let source_id = id_field(self.doc, names)
            .ok_or(TransformError::MissingReference { field: column })?;
        self.map
            .resolve(target, &source_id)
            .ok_or(TransformError::UnresolvedReference {
                field: column,
                kind: target,
                id: source_id,
            })
    }

    fn optional_ref(&mut self, column: &str, names: &[&str], target: EntityKind) -> Option<Uuid> {
        let source_id = id_field(self.doc, names)?;
        let resolved = self.map.resolve(target, &source_id);
        if resolved.is_none() {
            self.warnings.push(format!(
                "{} -> {} '{}' does not resolve; set to null",
                column, target, source_id
            ));
        }
        resolved
    }

    fn text(&self, names: &[&str]) -> String {
        string_field(self.doc, names).unwrap_or_default()
    }

    fn optional_text(&self, names: &[&str]) -> Option<String> {
        string_field(self.doc, names).filter(|s| !s.is_empty())
    }

    fn number(&mut self, column: &str, names: &[&str], default: f64) -> f64 {
        match field(self.doc, names) {
            None => default,
            Some(v) => number_field(self.doc, names).unwrap_or_else(|| {
                self.warnings
                    .push(format!("{} '{}' is not a number; using {}", column, v, default));
                default
            }),
        }
    }

    fn boolean(&mut self, column: &str, names: &[&str], default: bool) -> bool {
        match field(self.doc, names) {
            None => default,
            Some(v) => bool_field(self.doc, names).unwrap_or_else(|| {
                self.warnings
                    .push(format!("{} '{}' is not a boolean; using {}", column, v, default));
                default
            }),
        }
    }

    /// Enumerated value, lowercased; out-of-set values fall back to `default`.
    fn choice(&mut self, column: &str, names: &[&str], allowed: &[&str], default: &str) -> String {
        match string_field(self.doc, names) {
            None => default.to_string(),
            Some(v) if is_in_set(&v, allowed) => v.trim().to_lowercase(),
            Some(v) => {
                self.warnings.push(format!(
                    "{} '{}' is not one of [{}]; using '{}'",
                    column,
                    v,
                    allowed.join(", "),
                    default
                ));
                default.to_string()
            }
        }
    }

    fn timestamp(&mut self, column: &str, names: &[&str]) -> String {
        match timestamp_field(self.doc, names) {
            Timestamp::Parsed(ts) => format_timestamp(&ts),
            Timestamp::Missing => format_timestamp(&self.now),
            Timestamp::Unparseable(raw) => {
                self.warnings.push(format!(
                    "{} {} is not a timestamp; using execution time",
                    column, raw
                ));
                format_timestamp(&self.now)
            }
        }
    }

    /// Calendar date. Strings must be `YYYY-MM-DD` or a full timestamp;
    /// `$date` values and epoch milliseconds are reduced to their UTC date.
    fn date(&self, column: &'static str, names: &[&str]) -> Result<Option<String>, TransformError> {
        let Some(value) = field(self.doc, names) else {
            return Ok(None);
        };
        let invalid = || TransformError::InvalidDate {
            field: column,
            value: value.to_string(),
        };
        match value {
            Value::String(s) => {
                let s = s.trim();
                if is_valid_date(s) {
                    Ok(Some(s.to_string()))
                } else if s.len() > 10 && s.get(..10).is_some_and(is_valid_date) {
                    parse_timestamp(value)
                        .map(|ts| Some(ts.date_naive().to_string()))
                        .ok_or_else(invalid)
                } else {
                    Err(invalid())
                }
            }
            Value::Object(_) | Value::Number(_) => parse_timestamp(value)
                .map(|ts| Some(ts.date_naive().to_string()))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    fn time(&self, column: &'static str, names: &[&str]) -> Result<String, TransformError> {
        let value = string_field(self.doc, names).ok_or(TransformError::MissingField(column))?;
        let trimmed = value.trim();
        if is_valid_time(trimmed) {
            Ok(trimmed.to_string())
        } else {
            Err(TransformError::InvalidTime {
                field: column,
                value,
            })
        }
    }
}

fn account(ctx: &mut Context<'_>) -> Result<TransformedRecord, TransformError> {
    let (source_id, id) = ctx.own_id()?;
    let raw_email = string_field(ctx.doc, &["email"]).ok_or(TransformError::MissingField("email"))?;
    let email = raw_email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(TransformError::InvalidEmail(raw_email));
    }

    Ok(TransformedRecord::Account(AccountRecord {
        id,
        source_id,
        email,
        name: ctx.text(&["name"]),
        role: ctx.choice("role", &["role"], ACCOUNT_ROLES, "employee"),
        department: ctx.text(&["department"]),
        password_hash: ctx.text(&["passwordHash", "password"]),
        active: ctx.boolean("active", &["active", "isActive"], true),
        hourly_rate: ctx.number("hourly_rate", &["hourlyRate"], 0.0),
        created_at: ctx.timestamp("created_at", &["createdAt"]),
        updated_at: ctx.timestamp("updated_at", &["updatedAt"]),
    }))
}

fn overtime_request(ctx: &mut Context<'_>) -> Result<TransformedRecord, TransformError> {
    let (source_id, id) = ctx.own_id()?;
    let employee_id =
        ctx.required_ref("employee_id", &["employeeId", "employee"], EntityKind::Account)?;
    let approver_id =
        ctx.optional_ref("approver_id", &["approverId", "approvedBy"], EntityKind::Account);
    let date = ctx
        .date("date", &["date"])?
        .ok_or(TransformError::MissingField("date"))?;
    let start_time = ctx.time("start_time", &["startTime"])?;
    let end_time = ctx.time("end_time", &["endTime"])?;

    Ok(TransformedRecord::OvertimeRequest(OvertimeRequestRecord {
        id,
        source_id,
        employee_id,
        approver_id,
        date,
        start_time,
        end_time,
        hours: ctx.number("hours", &["hours"], 0.0),
        reason: ctx.text(&["reason"]),
        status: ctx.choice("status", &["status"], REQUEST_STATUSES, "pending"),
        category: ctx.choice("category", &["category"], REQUEST_CATEGORIES, "regular"),
        created_at: ctx.timestamp("created_at", &["createdAt"]),
        updated_at: ctx.timestamp("updated_at", &["updatedAt"]),
    }))
}

fn balance_ledger_entry(ctx: &mut Context<'_>) -> Result<TransformedRecord, TransformError> {
    let (source_id, id) = ctx.own_id()?;
    let account_id =
        ctx.required_ref("account_id", &["accountId", "employeeId"], EntityKind::Account)?;
    let overtime_request_id = ctx.optional_ref(
        "overtime_request_id",
        &["overtimeRequestId", "requestId"],
        EntityKind::OvertimeRequest,
    );
    let effective_date = ctx.date("effective_date", &["effectiveDate"])?;
    let created_at = ctx.timestamp("created_at", &["createdAt"]);
    // created_at is always a formatted timestamp, so its first ten
    // characters are its calendar date.
    let effective_date = effective_date.unwrap_or_else(|| created_at[..10].to_string());

    Ok(TransformedRecord::BalanceLedgerEntry(BalanceLedgerEntryRecord {
        id,
        source_id,
        account_id,
        overtime_request_id,
        entry_type: ctx.choice("entry_type", &["type", "entryType"], LEDGER_ENTRY_TYPES, "adjustment"),
        hours: ctx.number("hours", &["hours"], 0.0),
        effective_date,
        note: ctx.text(&["note", "description"]),
        created_at,
        updated_at: ctx.timestamp("updated_at", &["updatedAt"]),
    }))
}

fn audit_entry(ctx: &mut Context<'_>) -> Result<TransformedRecord, TransformError> {
    let (source_id, id) = ctx.own_id()?;
    let actor_id = ctx.optional_ref("actor_id", &["actorId", "userId"], EntityKind::Account);
    let details = match field(ctx.doc, &["details", "metadata"]) {
        Some(v) => relaxed(v),
        None => Value::Object(Default::default()),
    };

    Ok(TransformedRecord::AuditEntry(AuditEntryRecord {
        id,
        source_id,
        actor_id,
        action: ctx.text(&["action"]),
        entity_type: ctx.text(&["entityType"]),
        entity_id: field(ctx.doc, &["entityId"]).and_then(canonical_id),
        details,
        created_at: ctx.timestamp("created_at", &["createdAt", "timestamp"]),
    }))
}

fn organization_settings(ctx: &mut Context<'_>) -> Result<TransformedRecord, TransformError> {
    let (source_id, id) = ctx.own_id()?;
    let logo = match binary_field(ctx.doc, &["logo"]) {
        Ok(logo) => logo,
        Err(reason) => {
            ctx.warnings
                .push(format!("logo is not decodable ({}); dropped", reason));
            None
        }
    };
    let timezone = ctx
        .optional_text(&["timezone"])
        .unwrap_or_else(|| "UTC".to_string());

    Ok(TransformedRecord::OrganizationSettings(
        OrganizationSettingsRecord {
            id,
            source_id,
            name: ctx.text(&["name"]),
            timezone,
            week_start: ctx.choice("week_start", &["weekStart"], WEEK_STARTS, "monday"),
            overtime_multiplier: ctx.number(
                "overtime_multiplier",
                &["overtimeMultiplier"],
                1.5,
            ),
            logo_mime_type: if logo.is_some() {
                ctx.optional_text(&["logoMimeType"])
            } else {
                None
            },
            logo,
            created_at: ctx.timestamp("created_at", &["createdAt"]),
            updated_at: ctx.timestamp("updated_at", &["updatedAt"]),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::build_mapping;
    use chrono::TimeZone;
    use serde_json::json;

    const ALICE: &str = "507f1f77bcf86cd799439011";
    const BOB: &str = "507f1f77bcf86cd799439012";
    const REQUEST: &str = "65a000000000000000000001";
    const LEDGER: &str = "65b000000000000000000001";
    const AUDIT: &str = "65c000000000000000000001";
    const ORG: &str = "65d000000000000000000001";

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn id_docs(ids: &[&str]) -> Vec<Document> {
        ids.iter().map(|id| doc(json!({"_id": {"$oid": id}}))).collect()
    }

    fn mapping() -> IdentityMap {
        let accounts = id_docs(&[ALICE, BOB]);
        let requests = id_docs(&[REQUEST]);
        let ledger = id_docs(&[LEDGER]);
        let audit = id_docs(&[AUDIT]);
        let org = id_docs(&[ORG]);
        build_mapping(
            [
                (EntityKind::Account, accounts.as_slice()),
                (EntityKind::OvertimeRequest, requests.as_slice()),
                (EntityKind::BalanceLedgerEntry, ledger.as_slice()),
                (EntityKind::AuditEntry, audit.as_slice()),
                (EntityKind::OrganizationSettings, org.as_slice()),
            ],
            None,
        )
        .0
    }

    fn transform(kind: EntityKind, d: Value) -> Result<Transformed, TransformError> {
        transform_document(kind, &doc(d), &mapping(), now())
    }

    fn request_doc() -> Value {
        json!({
            "_id": {"$oid": REQUEST},
            "employeeId": {"$oid": ALICE},
            "approverId": {"$oid": BOB},
            "date": "2024-03-01",
            "startTime": "18:00",
            "endTime": "20:30",
            "hours": 2.5,
            "status": "approved",
            "createdAt": {"$date": "2024-03-01T21:00:00Z"},
            "updatedAt": {"$date": "2024-03-02T09:15:00.250Z"}
        })
    }

    #[test]
    fn test_account_normalizes_email_and_defaults() {
        let map = mapping();
        let t = transform_document(
            EntityKind::Account,
            &doc(json!({"_id": {"$oid": ALICE}, "email": "  Alice@Example.COM "})),
            &map,
            now(),
        )
        .unwrap();
        let TransformedRecord::Account(r) = t.record else {
            panic!("expected account");
        };
        assert_eq!(r.id, map.resolve(EntityKind::Account, ALICE).unwrap());
        assert_eq!(r.email, "alice@example.com");
        assert_eq!(r.role, "employee");
        assert_eq!(r.name, "");
        assert!(r.active);
        assert_eq!(r.hourly_rate, 0.0);
        assert_eq!(r.created_at, "2025-06-01T08:00:00.000Z");
        assert!(t.warnings.is_empty());
    }

    #[test]
    fn test_account_invalid_email_is_hard_error() {
        let err = transform(
            EntityKind::Account,
            json!({"_id": {"$oid": ALICE}, "email": "not-an-email"}),
        )
        .unwrap_err();
        assert_eq!(err, TransformError::InvalidEmail("not-an-email".into()));

        let err = transform(EntityKind::Account, json!({"_id": {"$oid": ALICE}})).unwrap_err();
        assert_eq!(err, TransformError::MissingField("email"));
    }

    #[test]
    fn test_invalid_enum_is_defaulted_with_warning() {
        let t = transform(
            EntityKind::Account,
            json!({"_id": {"$oid": ALICE}, "email": "a@example.com", "role": "superuser"}),
        )
        .unwrap();
        let TransformedRecord::Account(r) = t.record else {
            panic!("expected account");
        };
        assert_eq!(r.role, "employee");
        assert_eq!(t.warnings.len(), 1);
        assert!(t.warnings[0].contains("superuser"));
    }

    #[test]
    fn test_enum_matching_is_case_insensitive() {
        let t = transform(
            EntityKind::Account,
            json!({"_id": {"$oid": ALICE}, "email": "a@example.com", "role": "Manager"}),
        )
        .unwrap();
        let TransformedRecord::Account(r) = t.record else {
            panic!("expected account");
        };
        assert_eq!(r.role, "manager");
    }

    #[test]
    fn test_unmapped_own_id_is_hard_error() {
        let err = transform(
            EntityKind::Account,
            json!({"_id": {"$oid": "ffffffffffffffffffffffff"}, "email": "a@example.com"}),
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::UnmappedId(_)));
    }

    #[test]
    fn test_overtime_request_resolves_references_per_kind() {
        let map = mapping();
        let t = transform_document(EntityKind::OvertimeRequest, &doc(request_doc()), &map, now())
            .unwrap();
        let TransformedRecord::OvertimeRequest(r) = t.record else {
            panic!("expected overtime request");
        };
        assert_eq!(r.id, map.resolve(EntityKind::OvertimeRequest, REQUEST).unwrap());
        assert_eq!(r.employee_id, map.resolve(EntityKind::Account, ALICE).unwrap());
        assert_eq!(r.approver_id, map.resolve(EntityKind::Account, BOB));
        assert_eq!(r.status, "approved");
        assert_eq!(r.category, "regular");
        assert_eq!(r.created_at, "2024-03-01T21:00:00.000Z");
        assert_eq!(r.updated_at, "2024-03-02T09:15:00.250Z");
    }

    #[test]
    fn test_unresolved_required_reference_is_hard_error() {
        let mut d = request_doc();
        d["employeeId"] = json!({"$oid": "ffffffffffffffffffffffff"});
        let err = transform(EntityKind::OvertimeRequest, d).unwrap_err();
        assert!(matches!(
            err,
            TransformError::UnresolvedReference {
                field: "employee_id",
                kind: EntityKind::Account,
                ..
            }
        ));
    }

    #[test]
    fn test_reference_is_resolved_against_target_kind() {
        // REQUEST is a known overtime request id but not a known account.
        let mut d = request_doc();
        d["employeeId"] = json!({"$oid": REQUEST});
        assert!(transform(EntityKind::OvertimeRequest, d).is_err());
    }

    #[test]
    fn test_unresolved_optional_reference_becomes_null() {
        let mut d = request_doc();
        d["approverId"] = json!("ffffffffffffffffffffffff");
        let t = transform(EntityKind::OvertimeRequest, d).unwrap();
        let TransformedRecord::OvertimeRequest(r) = &t.record else {
            panic!("expected overtime request");
        };
        assert_eq!(r.approver_id, None);
        assert_eq!(t.warnings.len(), 1);
    }

    #[test]
    fn test_populated_reference_is_resolved() {
        let mut d = request_doc();
        d["employeeId"] = json!({"_id": {"$oid": ALICE}, "email": "alice@example.com"});
        assert!(transform(EntityKind::OvertimeRequest, d).is_ok());
    }

    #[test]
    fn test_date_rules() {
        let mut d = request_doc();
        d["date"] = json!({"$date": "2024-03-01T23:30:00Z"});
        let TransformedRecord::OvertimeRequest(r) =
            transform(EntityKind::OvertimeRequest, d).unwrap().record
        else {
            panic!("expected overtime request");
        };
        assert_eq!(r.date, "2024-03-01");

        for bad in [json!("03/01/2024"), json!("2024-02-30"), json!(true)] {
            let mut d = request_doc();
            d["date"] = bad;
            assert!(matches!(
                transform(EntityKind::OvertimeRequest, d),
                Err(TransformError::InvalidDate { field: "date", .. })
            ));
        }

        let mut d = request_doc();
        d.as_object_mut().unwrap().remove("date");
        assert_eq!(
            transform(EntityKind::OvertimeRequest, d).unwrap_err(),
            TransformError::MissingField("date")
        );
    }

    #[test]
    fn test_time_rules() {
        for bad in ["6pm", "24:00", "18:60", ""] {
            let mut d = request_doc();
            d["startTime"] = json!(bad);
            assert!(
                transform(EntityKind::OvertimeRequest, d).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_execution_time() {
        let mut d = request_doc();
        d["createdAt"] = json!("sometime last week");
        let t = transform(EntityKind::OvertimeRequest, d).unwrap();
        let TransformedRecord::OvertimeRequest(r) = &t.record else {
            panic!("expected overtime request");
        };
        assert_eq!(r.created_at, format_timestamp(&now()));
        assert!(t.warnings.iter().any(|w| w.contains("created_at")));
    }

    #[test]
    fn test_ledger_effective_date_defaults_to_created_date() {
        let t = transform(
            EntityKind::BalanceLedgerEntry,
            json!({
                "_id": {"$oid": LEDGER},
                "employeeId": {"$oid": ALICE},
                "requestId": {"$oid": REQUEST},
                "type": "accrual",
                "hours": {"$numberDouble": "2.5"},
                "createdAt": {"$date": "2024-03-04T10:00:00Z"}
            }),
        )
        .unwrap();
        let TransformedRecord::BalanceLedgerEntry(r) = t.record else {
            panic!("expected ledger entry");
        };
        assert_eq!(r.effective_date, "2024-03-04");
        assert_eq!(r.entry_type, "accrual");
        assert_eq!(r.hours, 2.5);
        assert!(r.overtime_request_id.is_some());
    }

    #[test]
    fn test_ledger_invalid_effective_date_is_hard_error() {
        let err = transform(
            EntityKind::BalanceLedgerEntry,
            json!({
                "_id": {"$oid": LEDGER},
                "accountId": {"$oid": ALICE},
                "effectiveDate": "next monday"
            }),
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::InvalidDate { field: "effective_date", .. }));
    }

    #[test]
    fn test_audit_entry_keeps_entity_id_and_relaxes_details() {
        let t = transform(
            EntityKind::AuditEntry,
            json!({
                "_id": {"$oid": AUDIT},
                "userId": {"$oid": BOB},
                "action": "approve",
                "entityType": "OvertimeRequest",
                "entityId": {"$oid": REQUEST},
                "metadata": {"hours": {"$numberInt": "3"}},
                "timestamp": {"$date": "2024-03-02T09:15:00Z"}
            }),
        )
        .unwrap();
        let TransformedRecord::AuditEntry(r) = t.record else {
            panic!("expected audit entry");
        };
        assert_eq!(r.entity_id.as_deref(), Some(REQUEST));
        assert_eq!(r.details, json!({"hours": 3}));
        assert_eq!(r.created_at, "2024-03-02T09:15:00.000Z");
        assert!(r.actor_id.is_some());
    }

    #[test]
    fn test_audit_entry_details_default_to_empty_object() {
        let t = transform(EntityKind::AuditEntry, json!({"_id": {"$oid": AUDIT}})).unwrap();
        let TransformedRecord::AuditEntry(r) = t.record else {
            panic!("expected audit entry");
        };
        assert_eq!(r.details, json!({}));
        assert_eq!(r.actor_id, None);
        assert_eq!(r.entity_id, None);
    }

    #[test]
    fn test_organization_settings_logo_is_base64() {
        let t = transform(
            EntityKind::OrganizationSettings,
            json!({
                "_id": {"$oid": ORG},
                "name": "Acme",
                "weekStart": "Sunday",
                "logo": {"$binary": {"base64": "iVBORw==", "subType": "00"}},
                "logoMimeType": "image/png"
            }),
        )
        .unwrap();
        let TransformedRecord::OrganizationSettings(r) = t.record else {
            panic!("expected organization settings");
        };
        assert_eq!(r.logo.as_deref(), Some("iVBORw=="));
        assert_eq!(r.logo_mime_type.as_deref(), Some("image/png"));
        assert_eq!(r.week_start, "sunday");
        assert_eq!(r.timezone, "UTC");
        assert_eq!(r.overtime_multiplier, 1.5);
    }

    #[test]
    fn test_undecodable_logo_is_dropped_with_warning() {
        let t = transform(
            EntityKind::OrganizationSettings,
            json!({"_id": {"$oid": ORG}, "logo": "%%%", "logoMimeType": "image/png"}),
        )
        .unwrap();
        let TransformedRecord::OrganizationSettings(r) = &t.record else {
            panic!("expected organization settings");
        };
        assert_eq!(r.logo, None);
        assert_eq!(r.logo_mime_type, None);
        assert_eq!(t.warnings.len(), 1);
    }

    #[test]
    fn test_transform_all_keeps_failures_with_documents() {
        let docs = vec![
            doc(json!({"_id": {"$oid": ALICE}, "email": "alice@example.com"})),
            doc(json!({"_id": {"$oid": BOB}, "email": "bob-at-example"})),
        ];
        let output = transform_all_at(EntityKind::Account, &docs, &mapping(), now());
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].index, 1);
        assert_eq!(output.failures[0].document, docs[1]);
        assert!(output.failures[0].error.contains("bob-at-example"));
    }

    #[test]
    fn test_repeated_canonical_id_is_rejected_after_first() {
        // 42 and "42" are distinct in the source but share one canonical id.
        let docs = vec![
            doc(json!({"_id": 42, "email": "first@example.com"})),
            doc(json!({"_id": "42", "email": "second@example.com"})),
            doc(json!({"_id": {"$oid": ALICE}, "email": "alice@example.com"})),
        ];
        let (map, _) = build_mapping([(EntityKind::Account, docs.as_slice())], None);

        let output = transform_all_at(EntityKind::Account, &docs, &map, now());
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].index, 1);
        assert_eq!(
            output.failures[0].error,
            TransformError::DuplicateId("42".into()).to_string()
        );
        let ids: HashSet<Uuid> = output.records.iter().map(|r| r.id()).collect();
        assert_eq!(ids.len(), output.records.len());
    }

    #[test]
    fn test_every_reference_resolves_through_the_map() {
        let map = mapping();
        let t = transform_document(EntityKind::OvertimeRequest, &doc(request_doc()), &map, now())
            .unwrap();
        for reference in t.record.references() {
            if let Some(id) = reference.id {
                assert!(map
                    .entries(reference.references)
                    .any(|(_, mapped)| mapped == id));
            }
        }
    }
}
