//! Binary-preserving JSON transform.
//!
//! Credential documents and some webhook payloads embed raw byte buffers.
//! On the wire and in the KV store those are carried as tagged objects,
//! `{"type": "Buffer", "data": "<base64>"}`; in memory the canonical form
//! keeps `data` as an array of bytes so code can index into it. [`encode`]
//! and [`decode`] convert between the two shapes, deeply, in place.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Number, Value};

/// Tag value identifying a buffer object.
const BUFFER_TAG: &str = "Buffer";

/// Rewrite every byte-array buffer in `value` into its base64 form.
///
/// Buffers already holding a base64 string pass through unchanged, so the
/// transform is idempotent.
pub fn encode(value: &mut Value) {
    if let Some(bytes) = tagged_bytes(value) {
        *value = tagged(Value::String(STANDARD.encode(bytes)));

        return;
    }

    match value {
        Value::Array(items) => {
            for item in items {
                encode(item);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                encode(item);
            }
        }
        _ => {}
    }
}

/// Rewrite every base64 buffer in `value` back into its byte-array form.
///
/// Strings that fail to decode as base64 are left untouched.
pub fn decode(value: &mut Value) {
    if is_buffer(value) {
        let data = value.get("data").and_then(Value::as_str);

        if let Some(bytes) = data.and_then(|text| STANDARD.decode(text).ok()) {
            let items = bytes
                .into_iter()
                .map(|byte| Value::Number(Number::from(byte)))
                .collect();

            *value = tagged(Value::Array(items));
        }

        return;
    }

    match value {
        Value::Array(items) => {
            for item in items {
                decode(item);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                decode(item);
            }
        }
        _ => {}
    }
}

/// Owned convenience over [`encode`].
pub fn encoded(mut value: Value) -> Value {
    encode(&mut value);

    value
}

/// Owned convenience over [`decode`].
pub fn decoded(mut value: Value) -> Value {
    decode(&mut value);

    value
}

/// Whether `value` is an object carrying the buffer tag and a data field.
fn is_buffer(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };

    map.get("type").and_then(Value::as_str) == Some(BUFFER_TAG) && map.contains_key("data")
}

/// The raw bytes of a byte-array buffer, if `value` is one.
fn tagged_bytes(value: &Value) -> Option<Vec<u8>> {
    if !is_buffer(value) {
        return None;
    }

    let items = value.get("data")?.as_array()?;

    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// Build a tagged buffer object around the given data representation.
fn tagged(data: Value) -> Value {
    serde_json::json!({ "type": BUFFER_TAG, "data": data })
}
