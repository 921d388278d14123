//! Deterministic job identity.
//!
//! Two submissions with the same job type and semantically-equal parameters
//! must map to the same fingerprint regardless of key insertion order, so the
//! fingerprint is a SHA-256 over a canonical serialization: object keys
//! sorted lexicographically at every depth, array order preserved, default
//! JSON scalar encoding.

use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Canonical serialization of a JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already serialize deterministically.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint of (job_type, input_params), rendered as lowercase hex.
pub fn job_hash(job_type: &str, input_params: &Value) -> String {
    let envelope = serde_json::json!({
        "input_params": input_params,
        "job_type": job_type,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&envelope).as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(64);
    for b in digest.as_slice() {
        let _ = write!(&mut hex, "{b:02x}");
    }
    hex
}

/// Generate an opaque unique identifier for jobs and runners.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as unix milliseconds, the timestamp unit used throughout the
/// store.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
