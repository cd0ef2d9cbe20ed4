//! Field-level predicates used by the identity mapper and the transformer.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static OBJECT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("object id pattern to compile"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern to compile")
});

static CALENDAR_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern to compile"));

static TIME_OF_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("time pattern to compile"));

pub const ACCOUNT_ROLES: &[&str] = &["employee", "manager", "admin"];
pub const REQUEST_STATUSES: &[&str] = &["pending", "approved", "rejected", "cancelled"];
pub const REQUEST_CATEGORIES: &[&str] = &["regular", "weekend", "holiday"];
pub const LEDGER_ENTRY_TYPES: &[&str] = &["accrual", "usage", "adjustment", "payout"];
pub const WEEK_STARTS: &[&str] = &["monday", "sunday"];

/// Source object identifier: 24 hex digits.
pub fn is_valid_object_id(id: &str) -> bool {
    OBJECT_ID.is_match(id)
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL.is_match(email)
}

/// `YYYY-MM-DD` that also names a real calendar day.
pub fn is_valid_date(value: &str) -> bool {
    CALENDAR_DATE.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// 24-hour `HH:MM`.
pub fn is_valid_time(value: &str) -> bool {
    TIME_OF_DAY.is_match(value)
}

/// Case-insensitive membership in an enumerated value set.
pub fn is_in_set(value: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|a| a.eq_ignore_ascii_case(value))
}
