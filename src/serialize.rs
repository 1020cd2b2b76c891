// =============================================================================
// Serialization helpers — canonical JSON and UTC time formatting
// =============================================================================
//
// Single source of truth for the crate's time/JSON boundary:
//   - internal math uses i64 UTC milliseconds everywhere;
//   - only serialization converts to RFC3339 strings with a `Z` suffix;
//   - `canonical_json_string` emits byte-stable JSON (recursively sorted
//     keys) so that identical inputs always serialize identically.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Format a UTC millisecond timestamp as RFC3339 with a `Z` suffix.
///
/// Millisecond precision is kept even when zero so the output width is
/// stable across runs.
pub fn ms_to_rfc3339(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => "-".to_string(),
    }
}

/// Parse an RFC3339 string (either `Z` or `+00:00` offset) into UTC
/// milliseconds. Returns `None` on anything unparseable.
pub fn rfc3339_to_ms(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// UTC day string (`YYYY-MM-DD`) for a millisecond timestamp. Used for the
/// journal's per-day JSONL directory layout.
pub fn ms_to_utc_day(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "1970-01-01".to_string(),
    }
}

/// Recursively sort every object's keys so the JSON byte stream is stable.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k, canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize any serde value to a canonical compact JSON string: keys sorted
/// recursively, no whitespace. Identical inputs produce identical bytes.
pub fn canonical_json_string<T: serde::Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).unwrap_or(Value::Null);
    canonicalize(raw).to_string()
}

// =============================================================================
// Serde adapters: i64 millisecond fields <-> RFC3339 strings
// =============================================================================

/// Serde adapter for required `i64` millisecond fields.
pub mod ts_ms {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::ms_to_rfc3339(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom("timestamp is not an i64")),
            serde_json::Value::String(s) => super::rfc3339_to_ms(&s)
                .ok_or_else(|| serde::de::Error::custom("unparseable RFC3339 timestamp")),
            _ => Err(serde::de::Error::custom("unsupported timestamp shape")),
        }
    }
}

/// Serde adapter for optional `i64` millisecond fields.
pub mod ts_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ms: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match ms {
            Some(v) => serializer.serialize_str(&super::ms_to_rfc3339(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        match raw {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => Ok(n.as_i64()),
            Some(serde_json::Value::String(s)) => Ok(super::rfc3339_to_ms(&s)),
            Some(_) => Err(serde::de::Error::custom("unsupported timestamp shape")),
        }
    }
}

/// Serde adapter for `Vec<i64>` millisecond lists.
pub mod ts_ms_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[i64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|ms| super::ms_to_rfc3339(*ms)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
        let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            match value {
                serde_json::Value::Number(n) => {
                    out.push(n.as_i64().ok_or_else(|| {
                        serde::de::Error::custom("timestamp is not an i64")
                    })?);
                }
                serde_json::Value::String(s) => {
                    out.push(super::rfc3339_to_ms(&s).ok_or_else(|| {
                        serde::de::Error::custom("unparseable RFC3339 timestamp")
                    })?);
                }
                _ => return Err(serde::de::Error::custom("unsupported timestamp shape")),
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ms_roundtrip() {
        let ms = 1_700_000_000_123_i64;
        let text = ms_to_rfc3339(ms);
        assert!(text.ends_with('Z'));
        assert_eq!(rfc3339_to_ms(&text), Some(ms));
    }

    #[test]
    fn rfc3339_accepts_offset_form() {
        assert_eq!(
            rfc3339_to_ms("2024-01-01T00:00:00+00:00"),
            Some(1_704_067_200_000)
        );
        assert_eq!(rfc3339_to_ms("2024-01-01T00:00:00Z"), Some(1_704_067_200_000));
    }

    #[test]
    fn rfc3339_rejects_garbage() {
        assert_eq!(rfc3339_to_ms(""), None);
        assert_eq!(rfc3339_to_ms("not-a-date"), None);
    }

    #[test]
    fn utc_day_format() {
        assert_eq!(ms_to_utc_day(1_704_067_200_000), "2024-01-01");
    }

    #[test]
    fn canonical_sorts_keys_recursively() {
        let v = json!({"b": 1, "a": {"z": 1, "y": [ {"q": 1, "p": 2} ]}});
        let text = canonical_json_string(&v);
        assert_eq!(text, r#"{"a":{"y":[{"p":2,"q":1}],"z":1},"b":1}"#);
    }

    #[test]
    fn canonical_is_deterministic() {
        let v = json!({"x": [3, 2, 1], "m": {"k2": "v", "k1": "u"}});
        assert_eq!(canonical_json_string(&v), canonical_json_string(&v));
    }
}
