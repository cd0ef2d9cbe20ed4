//! Raw source documents and Extended JSON field access.
//!
//! Documents arrive as MongoDB Extended JSON (relaxed or canonical). Wrapper
//! objects such as `{"$oid": ...}`, `{"$date": ...}`, `{"$numberLong": ...}`
//! and `{"$binary": ...}` are unwrapped here so the rest of the pipeline only
//! sees plain strings, numbers and bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// An untyped source record.
pub type Document = Map<String, Value>;

/// Canonical string form of a source identifier.
///
/// This is the only place store-native identifier representations are
/// interpreted. ObjectIds become lowercase hex, strings are trimmed, integers
/// become decimal text. Anything else (null, empty, objects, arrays) has no
/// canonical form.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if crate::validators::is_valid_object_id(s) {
                Some(s.to_ascii_lowercase())
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => n.as_i64().map(|i| i.to_string()),
        Value::Object(obj) => {
            if let Some(oid) = obj.get("$oid") {
                return canonical_id(oid);
            }
            if let Some(v) = obj.get("$numberLong").or_else(|| obj.get("$numberInt")) {
                return canonical_id(v);
            }
            // Populated reference: {"_id": ..., ...}
            obj.get("_id").and_then(canonical_id)
        }
        _ => None,
    }
}

/// First present, non-null value among `names`.
pub fn field<'a>(doc: &'a Document, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| doc.get(*n))
        .find(|v| !v.is_null())
}

/// Canonical identifier stored under any of `names`.
pub fn id_field(doc: &Document, names: &[&str]) -> Option<String> {
    field(doc, names).and_then(canonical_id)
}

/// Text value; numbers and booleans are rendered as text.
pub fn string_field(doc: &Document, names: &[&str]) -> Option<String> {
    match field(doc, names)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => canonical_id(other),
    }
}

/// Numeric value, unwrapping `$numberLong`/`$numberInt`/`$numberDouble`/`$numberDecimal`.
pub fn number_field(doc: &Document, names: &[&str]) -> Option<f64> {
    field(doc, names).and_then(as_number)
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(obj) => ["$numberDouble", "$numberDecimal", "$numberLong", "$numberInt"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(as_number),
        _ => None,
    };
    n.filter(|f| f.is_finite())
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Boolean value; accepts `true/false`, `1/0` and their string forms.
pub fn bool_field(doc: &Document, names: &[&str]) -> Option<bool> {
    match field(doc, names)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Outcome of reading a timestamp field.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    Parsed(DateTime<Utc>),
    Missing,
    Unparseable(String),
}

/// Parse a timestamp from `$date` wrappers, epoch milliseconds, RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` or a bare calendar date.
pub fn timestamp_field(doc: &Document, names: &[&str]) -> Timestamp {
    match field(doc, names) {
        None => Timestamp::Missing,
        Some(v) => match parse_timestamp(v) {
            Some(ts) => Timestamp::Parsed(ts),
            None => Timestamp::Unparseable(v.to_string()),
        },
    }
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_timestamp_str(s),
        Value::Object(obj) => obj
            .get("$date")
            .or_else(|| obj.get("$numberLong"))
            .and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Single ISO-8601 representation used for every timestamp column.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Binary payload re-encoded as standard base64.
///
/// Accepts `{"$binary": {"base64": ..}}`, the legacy `{"$binary": "..", "$type": ..}`,
/// a `data:` URL, a plain base64 string, or an array of byte values.
/// Returns `Err` with a reason when the value is present but not decodable.
pub fn binary_field(doc: &Document, names: &[&str]) -> Result<Option<String>, String> {
    let Some(value) = field(doc, names) else {
        return Ok(None);
    };
    binary_to_base64(value).map(Some)
}

fn binary_to_base64(value: &Value) -> Result<String, String> {
    match value {
        Value::Object(obj) => match obj.get("$binary") {
            Some(Value::Object(inner)) => inner
                .get("base64")
                .and_then(Value::as_str)
                .ok_or_else(|| "$binary without base64 payload".to_string())
                .and_then(normalize_base64),
            Some(Value::String(s)) => normalize_base64(s),
            _ => Err("unsupported binary wrapper".to_string()),
        },
        Value::String(s) => {
            let payload = match s.strip_prefix("data:") {
                Some(rest) => rest
                    .split_once(";base64,")
                    .map(|(_, data)| data)
                    .ok_or_else(|| "data URL is not base64 encoded".to_string())?,
                None => s.as_str(),
            };
            normalize_base64(payload)
        }
        Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes
                .map(|b| BASE64.encode(b))
                .ok_or_else(|| "byte array contains non-byte values".to_string())
        }
        _ => Err(format!("unsupported binary value: {}", value)),
    }
}

fn normalize_base64(s: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(s.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    Ok(BASE64.encode(bytes))
}

/// Decode a base64 payload produced by [`binary_field`].
pub fn decode_base64(s: &str) -> Result<Vec<u8>, String> {
    BASE64.decode(s).map_err(|e| format!("invalid base64: {}", e))
}

/// Strip Extended JSON wrappers recursively so free-form payloads (audit
/// details) land in the destination as plain JSON.
pub fn relaxed(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            if obj.contains_key("$oid") {
                return canonical_id(value).map(Value::String).unwrap_or(Value::Null);
            }
            if obj.contains_key("$date") {
                return parse_timestamp(value)
                    .map(|ts| Value::String(format_timestamp(&ts)))
                    .unwrap_or(Value::Null);
            }
            if obj.len() == 1 {
                // Integers stay exact; only doubles and decimals pass through f64.
                if let Some(i) = obj
                    .get("$numberLong")
                    .or_else(|| obj.get("$numberInt"))
                    .and_then(as_integer)
                {
                    return Value::from(i);
                }
                if let Some(n) = as_number(value) {
                    return serde_json::Number::from_f64(n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null);
                }
            }
            Value::Object(obj.iter().map(|(k, v)| (k.clone(), relaxed(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(relaxed).collect()),
        other => other.clone(),
    }
}
