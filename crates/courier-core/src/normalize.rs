//! # Payload Normalization
//!
//! The order service does not promise a stable response shape: depending on
//! version it answers with a bare array, an envelope such as
//! `{"data": [...]}`, or a double envelope such as
//! `{"data": {"orders": [...]}}`. Fetch results are coerced by
//! [`normalize_payload`] so the coercion rules live in one place.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Input                              │  Output            │ coercion     │
//! │  ───────────────────────────────────┼────────────────────┼──────────────│
//! │  [ ... ]                            │  [ ... ]           │ None         │
//! │  { "orders": [ ... ] }              │  [ ... ]           │ Unwrapped    │
//! │  { "data": { "items": [ ... ] } }   │  [ ... ]           │ Unwrapped    │
//! │  { "count": 3 } / null / "text"     │  []                │ Fallback     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Container keys are tried in [`CONTAINER_KEYS`] order; the first key
//! holding an array wins. Only `data` is searched one level deeper.

use serde_json::Value;

/// Container keys searched for the record array, in priority order.
pub const CONTAINER_KEYS: [&str; 5] = ["data", "orders", "items", "results", "records"];

/// How a payload had to be coerced into an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coercion {
    /// The array was found under `key` (dotted for the nested case).
    Unwrapped { key: String },

    /// Nothing usable was found; the payload became an empty array.
    /// `found` names the JSON kind that was received.
    Fallback { found: &'static str },
}

impl Coercion {
    /// Returns true if data was discarded (the ShapeError case).
    pub fn is_fallback(&self) -> bool {
        matches!(self, Coercion::Fallback { .. })
    }
}

impl std::fmt::Display for Coercion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Coercion::Unwrapped { key } => write!(f, "unwrapped array from '{}'", key),
            Coercion::Fallback { found } => {
                write!(f, "no record array in {} payload, using empty list", found)
            }
        }
    }
}

/// A payload coerced into a record array.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    pub records: Vec<Value>,
    pub coercion: Option<Coercion>,
}

/// Coerces an arbitrary payload into a list of records.
pub fn normalize_payload(payload: Value) -> NormalizedPayload {
    match payload {
        Value::Array(records) => NormalizedPayload {
            records,
            coercion: None,
        },
        Value::Object(mut object) => {
            if let Some((key, records)) = take_container(&mut object) {
                return NormalizedPayload {
                    records,
                    coercion: Some(Coercion::Unwrapped { key }),
                };
            }

            // One nested level under "data"
            if let Some(Value::Object(inner)) = object.get_mut("data") {
                if let Some((key, records)) = take_container(inner) {
                    return NormalizedPayload {
                        records,
                        coercion: Some(Coercion::Unwrapped {
                            key: format!("data.{}", key),
                        }),
                    };
                }
            }

            fallback("object")
        }
        Value::Null => fallback("null"),
        Value::Bool(_) => fallback("boolean"),
        Value::Number(_) => fallback("number"),
        Value::String(_) => fallback("string"),
    }
}

fn take_container(object: &mut serde_json::Map<String, Value>) -> Option<(String, Vec<Value>)> {
    let key = CONTAINER_KEYS
        .iter()
        .find(|key| matches!(object.get(**key), Some(Value::Array(_))))?;

    match object.remove(*key) {
        Some(Value::Array(records)) => Some((key.to_string(), records)),
        _ => None,
    }
}

fn fallback(found: &'static str) -> NormalizedPayload {
    NormalizedPayload {
        records: Vec::new(),
        coercion: Some(Coercion::Fallback { found }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_passes_through() {
        let normalized = normalize_payload(json!([{"id": "1"}]));
        assert_eq!(normalized.records, vec![json!({"id": "1"})]);
        assert!(normalized.coercion.is_none());
    }

    #[test]
    fn test_container_key_priority() {
        let normalized = normalize_payload(json!({
            "items": [{"id": "from-items"}],
            "orders": [{"id": "from-orders"}],
        }));

        assert_eq!(normalized.records[0]["id"], "from-orders");
        assert_eq!(
            normalized.coercion,
            Some(Coercion::Unwrapped { key: "orders".into() })
        );
    }

    #[test]
    fn test_non_array_container_is_skipped() {
        let normalized = normalize_payload(json!({
            "data": "maintenance",
            "results": [{"id": "1"}],
        }));
        assert_eq!(normalized.records.len(), 1);
    }

    #[test]
    fn test_nested_data_envelope() {
        let normalized = normalize_payload(json!({
            "data": {"orders": [{"id": "1"}, {"id": "2"}], "total": 2}
        }));

        assert_eq!(normalized.records.len(), 2);
        assert_eq!(
            normalized.coercion,
            Some(Coercion::Unwrapped { key: "data.orders".into() })
        );
    }

    #[test]
    fn test_unusable_payloads_fall_back_to_empty() {
        for payload in [json!(null), json!("oops"), json!(7), json!({"count": 3})] {
            let normalized = normalize_payload(payload);
            assert!(normalized.records.is_empty());
            assert!(normalized.coercion.as_ref().is_some_and(Coercion::is_fallback));
        }
    }
}
