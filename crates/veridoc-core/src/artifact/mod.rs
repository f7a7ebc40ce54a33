//! Canonical artifact serialization for byte-stable diffing.
//!
//! Reconciliation and fusion results are persisted and diffed run-over-run by
//! an external parity harness. That harness compares raw bytes, so every
//! artifact rendering must be canonical:
//!
//! - Object keys are emitted in lexicographic (byte-order) order.
//! - No whitespace between tokens.
//! - Strings use minimal escaping (only the escapes JSON requires).
//! - Confidence values are rounded to two decimal places before emission, so
//!   provider jitter below the rounding threshold cannot perturb the bytes.
//!
//! The emitter accepts any `Serialize` value; artifact records themselves
//! carry a fixed `schemaVersion` ([`ARTIFACT_SCHEMA_VERSION`]) and sort their
//! field lists before rendering.
//!
//! # Example
//!
//! ```
//! use veridoc_core::artifact::to_canonical_json;
//!
//! let value = serde_json::json!({ "z": 1, "a": 2 });
//! let canonical = to_canonical_json(&value).unwrap();
//! assert_eq!(canonical, r#"{"a":2,"z":1}"#);
//! ```

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Schema version stamped on every canonical artifact.
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0.0";

/// Errors from artifact serialization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactError {
    /// The value could not be converted to a JSON tree.
    #[error("artifact serialization failed: {message}")]
    Serialization {
        /// Description of the underlying serde failure.
        message: String,
    },
}

/// Rounds a confidence value to two decimal places, half away from zero.
///
/// All confidences that cross an artifact boundary go through this function
/// so that repeated runs emit identical bytes.
#[must_use]
pub fn round_confidence(confidence: f64) -> f64 {
    (confidence * 100.0).round() / 100.0
}

/// Serializes a value to canonical JSON.
///
/// The output has lexicographically sorted object keys, no whitespace, and
/// minimal string escaping, so equal values always produce equal bytes.
///
/// # Errors
///
/// Returns [`ArtifactError::Serialization`] if the value cannot be converted
/// to a JSON tree.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, ArtifactError> {
    let tree = serde_json::to_value(value).map_err(|e| ArtifactError::Serialization {
        message: e.to_string(),
    })?;
    let mut output = String::new();
    emit_value(&tree, &mut output);
    Ok(output)
}

/// Checks whether the input string is already a canonical artifact rendering.
///
/// Useful as an idempotence check in the parity harness.
#[must_use]
pub fn is_canonical_artifact(input: &str) -> bool {
    serde_json::from_str::<Value>(input)
        .ok()
        .map(|tree| {
            let mut output = String::new();
            emit_value(&tree, &mut output);
            output
        })
        .is_some_and(|canonical| canonical == input)
}

/// Emits a JSON value in canonical form.
fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => emit_array(arr, output),
        Value::Object(obj) => emit_object(obj, output),
    }
}

/// Emits a number in canonical form.
///
/// Integers print as plain decimals. Floats print through `serde_json`'s
/// shortest-roundtrip formatting, which is deterministic for a given bit
/// pattern; artifact confidences are pre-rounded to two decimals so the
/// shortest form is always compact.
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        output.push_str(&n.to_string());
    }
}

/// Emits a string with minimal escaping.
///
/// Only the quotation mark, reverse solidus, and control characters
/// U+0000..=U+001F are escaped; control characters use the short escapes
/// where JSON defines them and `\uXXXX` otherwise.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String) {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output);
    }
    output.push(']');
}

/// Emits an object with keys sorted in lexicographic byte order.
fn emit_object(obj: &Map<String, Value>, output: &mut String) {
    let mut sorted_keys: Vec<&String> = obj.keys().collect();
    sorted_keys.sort();

    output.push('{');
    for (i, key) in sorted_keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&obj[*key], output);
    }
    output.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Canonical emission
    // =========================================================================

    #[test]
    fn sorts_object_keys() {
        let value = serde_json::json!({ "z": 1, "a": 2, "m": 3 });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn sorts_nested_object_keys() {
        let value = serde_json::json!({ "outer": { "z": 1, "a": 2 } });
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"outer":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let value = serde_json::json!([3, 1, 2]);
        assert_eq!(to_canonical_json(&value).unwrap(), "[3,1,2]");
    }

    #[test]
    fn emits_primitives() {
        assert_eq!(to_canonical_json(&Value::Null).unwrap(), "null");
        assert_eq!(to_canonical_json(&true).unwrap(), "true");
        assert_eq!(to_canonical_json(&42).unwrap(), "42");
        assert_eq!(to_canonical_json(&"hello").unwrap(), r#""hello""#);
    }

    #[test]
    fn emits_rounded_floats_compactly() {
        let value = serde_json::json!({ "confidence": round_confidence(0.876_543) });
        assert_eq!(to_canonical_json(&value).unwrap(), r#"{"confidence":0.88}"#);
    }

    #[test]
    fn escapes_control_characters() {
        let value = serde_json::json!({ "text": "line1\nline2\ttab" });
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"text":"line1\nline2\ttab"}"#
        );
    }

    #[test]
    fn escapes_quotes_and_backslash() {
        let value = serde_json::json!({ "text": "say \"hi\" with \\" });
        assert_eq!(
            to_canonical_json(&value).unwrap(),
            r#"{"text":"say \"hi\" with \\"}"#
        );
    }

    // =========================================================================
    // Determinism
    // =========================================================================

    #[test]
    fn identical_trees_produce_identical_bytes() {
        let a = serde_json::json!({ "c": 3, "a": 1, "b": [1, { "y": 2, "x": 3 }] });
        let b = serde_json::json!({ "b": [1, { "x": 3, "y": 2 }], "a": 1, "c": 3 });
        assert_eq!(
            to_canonical_json(&a).unwrap(),
            to_canonical_json(&b).unwrap()
        );
    }

    #[test]
    fn emission_is_idempotent() {
        let value = serde_json::json!({ "z": { "b": 2, "a": 1 }, "n": 0.25 });
        let once = to_canonical_json(&value).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        assert_eq!(once, to_canonical_json(&reparsed).unwrap());
    }

    #[test]
    fn is_canonical_artifact_detects_form() {
        assert!(is_canonical_artifact(r#"{"a":1,"b":2}"#));
        assert!(!is_canonical_artifact(r#"{"b":2,"a":1}"#));
        assert!(!is_canonical_artifact(r#"{ "a": 1 }"#));
        assert!(!is_canonical_artifact("not json"));
    }

    // =========================================================================
    // Rounding
    // =========================================================================

    #[test]
    fn round_confidence_two_decimals() {
        assert!((round_confidence(0.876) - 0.88).abs() < f64::EPSILON);
        assert!((round_confidence(0.874) - 0.87).abs() < f64::EPSILON);
        assert!((round_confidence(0.875) - 0.88).abs() < f64::EPSILON);
        assert!((round_confidence(1.0) - 1.0).abs() < f64::EPSILON);
        assert!(round_confidence(0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rounded_values_roundtrip_through_canonical_form() {
        for raw in [0.333_333, 0.666_666, 0.123_456, 0.999_999] {
            let rounded = round_confidence(raw);
            let emitted = to_canonical_json(&serde_json::json!(rounded)).unwrap();
            let reparsed: f64 = serde_json::from_str(&emitted).unwrap();
            assert!((reparsed - rounded).abs() < f64::EPSILON);
        }
    }
}
