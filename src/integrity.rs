//! Idempotency-key to payload-fingerprint enforcement.
//!
//! Reshaped, per the re-architecture guidance, as an object owned by the client rather than a
//! module-level mutable map: each [`Client`](crate::client::Client) owns exactly one registry and
//! its lifecycle matches the client's.

use crate::error::EngineError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
pub struct IntegrityRegistry {
    fingerprints: Mutex<HashMap<String, [u8; 32]>>,
}

impl Default for IntegrityRegistry {
    fn default() -> Self {
        Self { fingerprints: Mutex::new(HashMap::new()) }
    }
}

impl IntegrityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `enforce(key, body)`: compute the fingerprint, pin it on first sight, reject reuse with a
    /// different fingerprint. Returns the fingerprint as lowercase hex, suitable for the
    /// `X-Payload-Hash` header.
    pub fn enforce<E>(&self, key: &str, body: Option<&Value>) -> Result<String, EngineError<E>> {
        let fingerprint = fingerprint(body);
        let mut table = self.fingerprints.lock().unwrap_or_else(|p| p.into_inner());
        match table.get(key) {
            Some(existing) if *existing != fingerprint => Err(EngineError::IntegrityViolation {
                message: format!(
                    "idempotency key {:?} was previously used with a different payload",
                    key
                ),
            }),
            Some(_) => Ok(hex(&fingerprint)),
            None => {
                table.insert(key.to_string(), fingerprint);
                Ok(hex(&fingerprint))
            }
        }
    }
}

/// `canonicalize`: `""` for an absent body, else a stable JSON text form with object keys
/// sorted recursively so semantically-identical bodies hash identically regardless of
/// construction order.
fn canonicalize(body: Option<&Value>) -> String {
    match body {
        None => String::new(),
        Some(value) => serde_json::to_string(&sort_keys(value)).unwrap_or_default(),
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), sort_keys(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn fingerprint(body: Option<&Value>) -> [u8; 32] {
    let canonical = canonicalize(body);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().into()
}

fn hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lowercase hex SHA-256 of the canonicalized body, independent of idempotency-key pinning.
/// Used to build dedup keys (`METHOD:URL:SHA-256(body)`) even when protocol mode is `standard`.
pub fn fingerprint_hex(body: Option<&Value>) -> String {
    hex(&fingerprint(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;

    #[test]
    fn same_key_same_body_succeeds_repeatedly() {
        let registry = IntegrityRegistry::new();
        let body = json!({"a": 1});
        let h1: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&body));
        let h2: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&body));
        assert_eq!(h1.unwrap(), h2.unwrap());
    }

    #[test]
    fn same_key_different_body_is_rejected() {
        let registry = IntegrityRegistry::new();
        let first = json!({"a": 1});
        let second = json!({"a": 2});
        let _: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&first));
        let result: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&second));
        assert!(result.unwrap_err().is_integrity_violation());
    }

    #[test]
    fn key_ordering_does_not_affect_fingerprint() {
        let registry = IntegrityRegistry::new();
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        let h1: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&a));
        let h2: Result<String, EngineError<io::Error>> = registry.enforce("k1", Some(&b));
        assert_eq!(h1.unwrap(), h2.unwrap());
    }

    #[test]
    fn absent_body_hashes_empty_string() {
        let registry = IntegrityRegistry::new();
        let h: Result<String, EngineError<io::Error>> = registry.enforce("k2", None);
        let expected = hex(&fingerprint(None));
        assert_eq!(h.unwrap(), expected);
    }

    #[test]
    fn fingerprint_is_lowercase_hex_sha256_length() {
        let h = hex(&fingerprint(Some(&json!({"x": true}))));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
