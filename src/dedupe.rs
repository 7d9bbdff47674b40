//! Bounded in-flight request deduplication.
//!
//! Concurrent identical requests (same `"METHOD:URL:BODYFINGERPRINT"` key) share a single
//! in-flight result. Modeled as a map of key -> completion broadcast, per the re-architecture
//! guidance for the source's promise-based dedup map: settle-time eviction runs under the same
//! mutex that guards insertion, so the "evict on settle" invariant holds under concurrency.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub const MAX_DEDUPE_MAP_SIZE: usize = 1000;

/// A value that can be shared across deduplicated waiters. Must be cheaply cloneable since every
/// waiter receives its own copy of the same logical result.
pub trait Shareable: Clone + Send + 'static {}
impl<T: Clone + Send + 'static> Shareable for T {}

enum Slot<V> {
    Pending(broadcast::Sender<V>),
}

struct Inner<V> {
    entries: HashMap<String, Slot<V>>,
    order: VecDeque<String>,
}

/// Bounded key -> in-flight-result registry, FIFO-evicted at [`MAX_DEDUPE_MAP_SIZE`].
pub struct DedupeMap<V> {
    inner: Mutex<Inner<V>>,
}

impl<V: Shareable> Default for DedupeMap<V> {
    fn default() -> Self {
        Self { inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() }) }
    }
}

/// Outcome of attempting to join or start a deduplicated call.
pub enum Join<V> {
    /// This caller is the leader: it must perform the call and then [`DedupeMap::settle`].
    Lead,
    /// An identical call is already in flight; await this receiver for the shared result.
    Follow(broadcast::Receiver<V>),
}

impl<V: Shareable> DedupeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight call for `key`, or become its leader if none exists yet.
    pub fn join(&self, key: &str) -> Join<V> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(Slot::Pending(tx)) = inner.entries.get(key) {
            return Join::Follow(tx.subscribe());
        }

        if inner.entries.len() >= MAX_DEDUPE_MAP_SIZE {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }

        let (tx, _rx) = broadcast::channel(1);
        inner.entries.insert(key.to_string(), Slot::Pending(tx));
        inner.order.push_back(key.to_string());
        Join::Lead
    }

    /// Deliver the result to any followers and remove the entry so future calls observe a fresh
    /// attempt rather than a stale cached result.
    pub fn settle(&self, key: &str, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(Slot::Pending(tx)) = inner.entries.remove(key) {
            let _ = tx.send(value);
        }
        inner.order.retain(|k| k != key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `dedupKey = "METHOD:URL:SHA-256(body)"`.
pub fn dedupe_key(method: &str, url: &str, body_fingerprint_hex: &str) -> String {
    format!("{}:{}:{}", method, url, body_fingerprint_hex)
}

/// Dedup applies only when `dedupe_enabled`, the method is idempotent-read (GET/HEAD), and
/// `max_attempts <= 1` (spec §4.4; enabling retries silently disables dedup, intentional — see
/// Open Question 4).
pub fn dedupe_applies(dedupe_enabled: bool, method: &str, max_attempts: u32) -> bool {
    dedupe_enabled && matches!(method, "GET" | "HEAD") && max_attempts <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_leads_second_follows() {
        let map: DedupeMap<u32> = DedupeMap::new();
        let key = dedupe_key("GET", "/users/1", "abc");

        let lead = map.join(&key);
        assert!(matches!(lead, Join::Lead));

        let follow = map.join(&key);
        let mut rx = match follow {
            Join::Follow(rx) => rx,
            Join::Lead => panic!("expected follower"),
        };

        map.settle(&key, 42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn settle_removes_entry_so_next_call_leads_again() {
        let map: DedupeMap<u32> = DedupeMap::new();
        let key = dedupe_key("GET", "/x", "f");
        assert!(matches!(map.join(&key), Join::Lead));
        map.settle(&key, 1);
        assert!(matches!(map.join(&key), Join::Lead));
    }

    #[tokio::test]
    async fn three_concurrent_followers_all_receive_shared_result() {
        let map: DedupeMap<&'static str> = DedupeMap::new();
        let key = dedupe_key("GET", "/users/1", "f");
        assert!(matches!(map.join(&key), Join::Lead));

        let mut receivers = vec![];
        for _ in 0..2 {
            if let Join::Follow(rx) = map.join(&key) {
                receivers.push(rx);
            } else {
                panic!("expected follower");
            }
        }

        map.settle(&key, "shared-response");
        for mut rx in receivers {
            assert_eq!(rx.recv().await.unwrap(), "shared-response");
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let map: DedupeMap<u32> = DedupeMap::new();
        for i in 0..MAX_DEDUPE_MAP_SIZE {
            let _ = map.join(&format!("k{}", i));
        }
        assert_eq!(map.len(), MAX_DEDUPE_MAP_SIZE);
        let _ = map.join("k-overflow");
        assert_eq!(map.len(), MAX_DEDUPE_MAP_SIZE);
        assert!(matches!(map.join("k0"), Join::Lead), "oldest entry should have been evicted");
    }

    #[test]
    fn dedupe_applies_matches_spec_gating() {
        assert!(dedupe_applies(true, "GET", 1));
        assert!(dedupe_applies(true, "HEAD", 1));
        assert!(!dedupe_applies(true, "POST", 1));
        assert!(!dedupe_applies(true, "GET", 3));
        assert!(!dedupe_applies(false, "GET", 1));
    }
}
