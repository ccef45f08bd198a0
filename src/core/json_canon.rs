//! Canonical JSON encoding for state tokens and notes trees.
//!
//! Object ids of rebuilt commits are compared byte for byte, so every JSON
//! document we hash into git must have exactly one encoding.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonJsonError {
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("non-finite float values are not allowed")]
    NonFiniteFloat,
}

/// Serialize a value to canonical JSON bytes.
///
/// Canonical rules:
/// - object keys sorted by UTF-8 byte order, recursively
/// - no insignificant whitespace
/// - floats must be finite
pub fn to_canon_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonJsonError> {
    let value = serde_json::to_value(value)?;
    let canon = canon_value(value)?;
    Ok(serde_json::to_vec(&canon)?)
}

/// Same as [`to_canon_json_bytes`], as a `String`.
pub fn to_canon_json_string<T: Serialize>(value: &T) -> Result<String, CanonJsonError> {
    let value = serde_json::to_value(value)?;
    let canon = canon_value(value)?;
    Ok(serde_json::to_string(&canon)?)
}

fn canon_value(value: Value) -> Result<Value, CanonJsonError> {
    Ok(match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            let mut canon = Map::new();
            for (key, value) in entries {
                canon.insert(key, canon_value(value)?);
            }
            Value::Object(canon)
        }
        Value::Array(values) => Value::Array(
            values
                .into_iter()
                .map(canon_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Number(n) => {
            if let Some(f) = n.as_f64()
                && n.is_f64()
                && !f.is_finite()
            {
                return Err(CanonJsonError::NonFiniteFloat);
            }
            Value::Number(n)
        }
        other => other,
    })
}
