//! Canonical JSON digests for non-tabular artifacts.
//!
//! Object keys are sorted by UTF-16 code units and integer-valued floats
//! collapse to integers, so structurally equal values share a digest
//! regardless of key insertion order.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use super::error::Result;

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys_utf16).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other.clone(),
    }
}

fn normalize_number(n: &Number) -> Number {
    if n.is_i64() || n.is_u64() {
        return n.clone();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

/// Compact JSON with sorted keys and normalized numbers.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys_utf16(value))?)
}

/// SHA-256 hex digest of [`canonical_json`].
pub fn value_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(value_digest(&a).unwrap(), value_digest(&b).unwrap());
    }

    #[test]
    fn integer_valued_floats_collapse() {
        assert_eq!(canonical_json(&json!({"v": 1.0})).unwrap(), r#"{"v":1}"#);
        assert_eq!(canonical_json(&json!({"v": 1.5})).unwrap(), r#"{"v":1.5}"#);
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!([3, 1, 2]);
        let b = json!([1, 2, 3]);
        assert_ne!(value_digest(&a).unwrap(), value_digest(&b).unwrap());
    }
}
