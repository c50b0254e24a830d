//! Content hashing and batch identity
//!
//! The hash is the dedup key: two batches with the same canonical content
//! produce the same digest no matter how their maps were ordered in memory.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// SHA-256 hex digest of the canonical JSON form of `data`
///
/// Returns `None` when `data` cannot be represented as JSON (for example a map
/// with non-string keys). Callers treat that as "cannot dedup, always insert".
pub fn compute_hash<T: Serialize + ?Sized>(data: &T) -> Option<String> {
    let value = match serde_json::to_value(data) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("⚠️  Content hash unavailable: {}", e);
            return None;
        }
    };
    Some(hash_value(&value))
}

/// Digest an already-built JSON value
pub fn hash_value(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted at every depth
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Current Unix time in seconds
pub fn allocate_batch_id() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Hands out strictly increasing batch ids for one source
///
/// Wall-clock seconds are used when they move forward; otherwise the id is
/// bumped past the last one seen, so two cycles within the same second (or a
/// clock step backwards) never collide.
#[derive(Debug, Default)]
pub struct BatchIdAllocator {
    last_issued: Option<i64>,
}

impl BatchIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, last_persisted: Option<i64>) -> i64 {
        self.next_at(allocate_batch_id(), last_persisted)
    }

    fn next_at(&mut self, now: i64, last_persisted: Option<i64>) -> i64 {
        let floor = match (last_persisted, self.last_issued) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let id = match floor {
            Some(floor) => now.max(floor + 1),
            None => now,
        };
        self.last_issued = Some(id);
        id
    }
}
