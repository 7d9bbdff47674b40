//! Opaque identifier generation for requests and auto-generated idempotency keys.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_base36(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..BASE36_ALPHABET.len());
            BASE36_ALPHABET[idx] as char
        })
        .collect()
}

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

/// `requestId = "req_" + millis + "_" + 7 random base36 chars`.
pub fn generate_request_id() -> String {
    format!("req_{}_{}", now_millis(), random_base36(&mut rand::rng(), 7))
}

/// `"idem_" + millis + "_" + 9 random base36 chars`.
pub fn generate_idempotency_key() -> String {
    format!("idem_{}_{}", now_millis(), random_base36(&mut rand::rng(), 9))
}
