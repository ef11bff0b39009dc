//! In-process [`Store`] with the same observable semantics as the Redis
//! backend: strings with lazy TTL expiry, sorted sets ordered by
//! `(score, member)`, and atomic set-if-absent.
//!
//! Used by the test suite and handy for single-pod local development where
//! no external store is running. Coordination through a `MemoryStore` is
//! only visible to clones of the same instance.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::{error::Result, store::Store};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    zsets: HashMap<String, HashMap<String, f64>>,
}

impl Inner {
    /// Drop the key if its TTL has lapsed, then return whether it is live.
    fn live(&mut self, key: &str, now: Instant) -> bool {
        if self.strings.get(key).is_some_and(|e| e.expired(now)) {
            self.strings.remove(key);
        }
        self.strings.contains_key(key)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Translate a possibly-negative ZRANGE index to an absolute offset.
fn absolute(index: i64, len: usize) -> i64 {
    if index < 0 {
        index + len as i64
    } else {
        index
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            let mut guard = inner.lock().unwrap();
            let now = Instant::now();
            if !guard.live(&key, now) {
                return Ok(None);
            }
            Ok(guard.strings.get(&key).map(|e| e.value.clone()))
        }
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            let entry = Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            };
            inner.lock().unwrap().strings.insert(key, entry);
            Ok(())
        }
    }

    fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            let mut guard = inner.lock().unwrap();
            let now = Instant::now();
            if guard.live(&key, now) {
                return Ok(false);
            }
            guard.strings.insert(
                key,
                Entry {
                    value,
                    expires_at: Some(now + ttl),
                },
            );
            Ok(true)
        }
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            inner.lock().unwrap().strings.remove(&key);
            Ok(())
        }
    }

    fn zadd(&self, key: &str, score: f64, member: &str) -> impl Future<Output = Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let member = member.to_string();
        async move {
            inner
                .lock()
                .unwrap()
                .zsets
                .entry(key)
                .or_default()
                .insert(member, score);
            Ok(())
        }
    }

    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            let guard = inner.lock().unwrap();
            let Some(set) = guard.zsets.get(&key) else {
                return Ok(Vec::new());
            };

            let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
            members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

            let len = members.len();
            let start = absolute(start, len).max(0);
            let stop = absolute(stop, len).min(len as i64 - 1);
            if start > stop || start >= len as i64 {
                return Ok(Vec::new());
            }
            Ok(members[start as usize..=stop as usize]
                .iter()
                .map(|(m, _)| (*m).clone())
                .collect())
        }
    }

    fn zrem(&self, key: &str, member: &str) -> impl Future<Output = Result<()>> + Send {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let member = member.to_string();
        async move {
            let mut guard = inner.lock().unwrap();
            if let Some(set) = guard.zsets.get_mut(&key) {
                set.remove(&member);
                if set.is_empty() {
                    guard.zsets.remove(&key);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── strings ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn del_removes_key() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_key() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some("v".to_string()));
    }

    // ── set_nx ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn set_nx_acquires_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_nx("lock", "a".to_string(), ttl).await.unwrap());
        assert!(!store.set_nx("lock", "b".to_string(), ttl).await.unwrap());
        // The holder's value is untouched by the failed attempt.
        assert_eq!(store.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_succeeds_after_ttl_lapses() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_nx("lock", "a".to_string(), ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.set_nx("lock", "b".to_string(), ttl).await.unwrap());
    }

    // ── sorted sets ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", 2.0, "b").await.unwrap();
        store.zadd("z", 1.0, "c").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();
        let got = store.zrange("z", 0, -1).await.unwrap();
        assert_eq!(got, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn zadd_existing_member_updates_score_without_duplicating() {
        let store = MemoryStore::new();
        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 3.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        let got = store.zrange("z", 0, -1).await.unwrap();
        assert_eq!(got, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn zrange_respects_bounds_and_negative_indices() {
        let store = MemoryStore::new();
        for (i, m) in ["a", "b", "c", "d"].iter().enumerate() {
            store.zadd("z", i as f64, m).await.unwrap();
        }
        assert_eq!(store.zrange("z", 0, 1).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.zrange("z", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.zrange("z", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert_eq!(store.zrange("z", 0, 99).await.unwrap(), vec!["a", "b", "c", "d"]);
        assert!(store.zrange("z", 3, 1).await.unwrap().is_empty());
        assert!(store.zrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zrem_removes_member() {
        let store = MemoryStore::new();
        store.zadd("z", 1.0, "a").await.unwrap();
        store.zadd("z", 2.0, "b").await.unwrap();
        store.zrem("z", "a").await.unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["b"]);
    }
}
