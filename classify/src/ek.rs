// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Helpers for tshark's Elasticsearch (`-T ek`) record shape.
//!
//! EK wraps scalar field values in single-element arrays, and the same field
//! has been spelled differently across tshark releases, so every extraction
//! takes a list of candidate key names and unwraps array values.

use serde_json::{Map, Value};

/// Get the first present scalar among `keys`, unwrapping EK array wrapping.
pub(crate) fn scalar<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        match obj.get(*key) {
            Some(Value::Array(items)) => return items.first(),
            Some(value) => return Some(value),
            None => {}
        }
    }
    None
}

/// Get a trimmed, non-empty string field.
pub(crate) fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let value = scalar(obj, keys)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

/// Get a finite float field; EK emits numbers as strings as often as not.
pub(crate) fn float_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    let value = scalar(obj, keys)?;
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

/// Get an integer field, accepting decimal and `0x`-prefixed hex spellings.
pub(crate) fn int_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    let value = scalar(obj, keys)?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

/// Decode tshark 4.x's hex-colon SSID form (`"48:69:6c:74:6f:6e"`), falling
/// back to the raw string when it is not in that form.
pub(crate) fn decode_ssid(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() < 2 || !parts.iter().all(|p| p.len() == 2) {
        return raw.to_string();
    }
    let mut bytes = Vec::with_capacity(parts.len());
    for part in parts {
        match u8::from_str_radix(part, 16) {
            Ok(b) => bytes.push(b),
            Err(_) => return raw.to_string(),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn scalars_are_unwrapped_from_ek_arrays() {
        let o = obj(json!({"a": ["x"], "b": "y"}));
        assert_eq!(string_field(&o, &["a"]), Some("x".to_string()));
        assert_eq!(string_field(&o, &["b"]), Some("y".to_string()));
        assert_eq!(string_field(&o, &["missing", "b"]), Some("y".to_string()));
    }

    #[test]
    fn floats_parse_from_numbers_and_strings() {
        let o = obj(json!({"n": [-61.5], "s": ["-61.5"], "bad": ["nan"]}));
        assert_eq!(float_field(&o, &["n"]), Some(-61.5));
        assert_eq!(float_field(&o, &["s"]), Some(-61.5));
        assert_eq!(float_field(&o, &["bad"]), None);
    }

    #[test]
    fn ints_parse_hex_and_decimal() {
        let o = obj(json!({"hex": ["0x000d"], "dec": ["13"], "num": [13]}));
        assert_eq!(int_field(&o, &["hex"]), Some(13));
        assert_eq!(int_field(&o, &["dec"]), Some(13));
        assert_eq!(int_field(&o, &["num"]), Some(13));
    }

    #[test]
    fn hex_colon_ssids_decode() {
        assert_eq!(decode_ssid("48:69:6c:74:6f:6e"), "Hilton");
        // Not hex-colon encoded: returned as-is.
        assert_eq!(decode_ssid("ANAFI-ABCDEF"), "ANAFI-ABCDEF");
        assert_eq!(decode_ssid("xy:zz"), "xy:zz");
    }
}
