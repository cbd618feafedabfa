//! Canonical JSON encoding (spec §4.1)
//!
//! Canonical serialization is a total function from the JSON value space to a
//! byte string: object keys are emitted in lexicographic order, duplicate keys
//! are rejected, numbers must be finite, and strings use minimal JSON escaping.
//! This is the normative encoding for all hashing in this workspace.

use crate::error::{Error, Result};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Serialize any `Serialize` value to canonical bytes.
///
/// Round-trips through JSON text so that duplicate-key and non-finite-number
/// checks apply uniformly, then re-emits with sorted keys and minimal escaping.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let text = serde_json::to_string(value)?;
    canonical_bytes_from_str(&text)
}

/// Parse JSON text with duplicate-key / non-finite-number checks, then emit
/// canonical bytes.
pub fn canonical_bytes_from_str(text: &str) -> Result<Vec<u8>> {
    let value = parse_checked(text)?;
    Ok(write_canonical(&value))
}

/// Parse JSON text into a `serde_json::Value`, rejecting duplicate object
/// keys and non-finite numbers along the way.
pub fn parse_checked(text: &str) -> Result<Value> {
    match serde_json::from_str::<CheckedValue>(text) {
        Ok(wrapped) => Ok(wrapped.0),
        Err(err) => Err(classify_checked_error(err)),
    }
}

/// `CheckedVisitor` can only signal failure through the generic
/// `serde::de::Error::custom`, so the specific rejection reason travels as
/// the message text. Recover it here rather than collapsing every rejection
/// into the generic `Error::Json` variant.
fn classify_checked_error(err: serde_json::Error) -> Error {
    let message = err.to_string();
    if let Some(key) = message.strip_prefix("duplicate key in object: ") {
        let key = key.split(" at line").next().unwrap_or(key).trim();
        return Error::DuplicateKey(key.to_string());
    }
    if message.starts_with("non-finite number") {
        return Error::NonFinite;
    }
    Error::Json(err)
}

/// Emit canonical bytes for an already-parsed `Value`. Callers that built the
/// `Value` programmatically (rather than parsing untrusted text) are
/// responsible for having avoided duplicate keys and non-finite numbers --
/// `serde_json::Map` cannot represent the former and `Number` cannot
/// represent the latter, so this is safe for values produced by `to_value`.
pub fn write_canonical(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(canonical_number(n).as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(map.get(key.as_str()).expect("key came from map"), out);
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json's string serialization already uses minimal, stable escaping.
    let encoded = serde_json::to_string(s).expect("string serialization cannot fail");
    out.extend_from_slice(encoded.as_bytes());
}

fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().expect("serde_json::Number is i64, u64, or f64");
    let f = if f == 0.0 { 0.0 } else { f };
    Number::from_f64(f)
        .expect("non-finite floats are rejected before reaching canonical_number")
        .to_string()
}

/// Wrapper whose `Deserialize` impl walks the JSON tree rejecting duplicate
/// object keys and non-finite numbers, instead of silently overwriting or
/// truncating them the way `serde_json::Value`'s default impl would.
struct CheckedValue(Value);

impl<'de> Deserialize<'de> for CheckedValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(CheckedVisitor).map(CheckedValue)
    }
}

struct CheckedSeed;

impl<'de> de::DeserializeSeed<'de> for CheckedSeed {
    type Value = Value;

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(CheckedVisitor)
    }
}

struct CheckedVisitor;

impl<'de> Visitor<'de> for CheckedVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a canonical JSON value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() {
            return Err(E::custom("non-finite number"));
        }
        Ok(Value::from(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut out = Vec::new();
        while let Some(item) = seq.next_element_seed(CheckedSeed)? {
            out.push(item);
        }
        Ok(Value::Array(out))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut obj = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(CheckedSeed)?;
            if obj.insert(key.clone(), value).is_some() {
                return Err(de::Error::custom(format!("duplicate key in object: {key}")));
            }
        }
        Ok(Value::Object(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_object_keys() {
        let a = canonical_bytes_from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b = canonical_bytes_from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = canonical_bytes_from_str(r#"{"a":1,"a":2}"#).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(key) if key == "a"));
    }

    #[test]
    fn rejects_non_finite_number() {
        let err = canonical_bytes_from_str("1e400").unwrap_err();
        assert!(matches!(err, Error::NonFinite));
    }

    #[test]
    fn negative_zero_normalizes_to_zero() {
        let a = canonical_bytes_from_str("-0.0").unwrap();
        assert_eq!(a, b"0");
    }

    #[test]
    fn nested_structures_round_trip() {
        let v = serde_json::json!({"z": [1,2,3], "a": {"y": true, "x": null}});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(bytes, br#"{"a":{"x":null,"y":true},"z":[1,2,3]}"#.to_vec());
    }

    #[test]
    fn deep_clone_hashes_identically() {
        let v1 = serde_json::json!({"k": "v", "n": 3});
        let v2 = v1.clone();
        assert_eq!(canonical_bytes(&v1).unwrap(), canonical_bytes(&v2).unwrap());
    }
}
