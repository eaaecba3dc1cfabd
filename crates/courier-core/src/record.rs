//! # Record Identity
//!
//! Orders are opaque to the engine. Reconciliation needs exactly two things
//! from each record: a stable id and a last-modified timestamp. This module
//! extracts both from JSON orders and lets typed records opt in through
//! [`SyncRecord`].
//!
//! ## Field Lookup
//! ```text
//! id             : "id" → "_id" → "orderId"       (string or integer)
//! last-modified  : "updatedAt" → "updated_at" → "lastModified"
//!                  (RFC 3339 string or epoch milliseconds)
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Fields consulted, in order, for a record id.
pub const ID_FIELDS: [&str; 3] = ["id", "_id", "orderId"];

/// Fields consulted, in order, for a last-modified timestamp.
pub const MODIFIED_FIELDS: [&str; 3] = ["updatedAt", "updated_at", "lastModified"];

/// Field written by [`stamp_modified`].
pub const MODIFIED_FIELD: &str = "updatedAt";

/// A record the engine can reconcile.
pub trait SyncRecord {
    /// Stable identifier, or `None` if the record carries no usable id.
    fn record_id(&self) -> Option<String>;

    /// Last-modified time. Records without one lose every comparison.
    fn modified_at(&self) -> Option<DateTime<Utc>>;
}

impl SyncRecord for Value {
    fn record_id(&self) -> Option<String> {
        let object = self.as_object()?;
        ID_FIELDS.iter().find_map(|field| match object.get(*field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    fn modified_at(&self) -> Option<DateTime<Utc>> {
        let object = self.as_object()?;
        MODIFIED_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(parse_timestamp))
    }
}

/// Parses an RFC 3339 string or an epoch-milliseconds number.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Writes `at` into the record's `updatedAt` field.
///
/// Non-object values are left untouched.
pub fn stamp_modified(record: &mut Value, at: DateTime<Utc>) {
    if let Some(object) = record.as_object_mut() {
        object.insert(MODIFIED_FIELD.to_string(), Value::String(at.to_rfc3339()));
    }
}
