use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Key holding the membership map (`pod_id` -> `PodInfo`, JSON object).
pub const PODS_KEY: &str = "schedulerx:pods";
/// Sorted set of pending job ids, scored by scheduled unix seconds.
pub const JOBS_KEY: &str = "scheduler:jobs";

/// Key holding one job's detail record.
pub fn job_key(job_id: &str) -> String {
    format!("scheduler:job:{job_id}")
}

/// Key holding one job's execution lock. The value is the locking pod's id.
pub fn job_lock_key(job_id: &str) -> String {
    format!("schedulerx:job_lock:{job_id}")
}

/// The minimal key-value operations the scheduler coordinates through.
///
/// Any backend providing per-key-linearizable strings, sorted sets, and an
/// atomic set-if-absent with TTL suffices. Implementations normalize
/// "key missing" to an empty result; every other backend error surfaces
/// unchanged as [`crate::Error::Store`].
pub trait Store: Clone + Send + Sync + 'static {
    /// `GET key`. `None` when the key is absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// `SET key value [EX ttl]`.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `SET key value NX EX ttl`. Returns true iff the key was absent.
    /// This is the distributed lock primitive.
    fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// `DEL key`.
    fn del(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// `ZADD key score member`. Re-adding an existing member updates its score.
    fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `ZRANGE key start stop`, ascending by score, ties broken by member.
    /// Negative indices address the tail, `-1` being the last member.
    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// `ZREM key member`.
    fn zrem(&self, key: &str, member: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Typed JSON access layered over the raw string operations.
pub trait StoreExt: Store {
    /// Read and deserialize a JSON value. `None` when the key is absent.
    fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<T>>> + Send {
        async move {
            match self.get(key).await? {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        }
    }

    /// Serialize and write a JSON value with an optional TTL.
    fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let raw = serde_json::to_string(value)?;
            self.set(key, raw, ttl).await
        }
    }
}

impl<S: Store> StoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_impls::MemoryStore;

    #[tokio::test]
    async fn get_json_missing_key_is_none() {
        let store = MemoryStore::new();
        let got: Option<Vec<String>> = store.get_json("nope").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn json_roundtrip() {
        let store = MemoryStore::new();
        let value = vec!["a".to_string(), "b".to_string()];
        store.set_json("k", &value, None).await.unwrap();
        let got: Option<Vec<String>> = store.get_json("k").await.unwrap();
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn get_json_malformed_value_is_an_error() {
        let store = MemoryStore::new();
        store
            .set("k", "{not valid json}".to_string(), None)
            .await
            .unwrap();
        let got = store.get_json::<Vec<String>>("k").await;
        assert!(got.is_err());
    }

    #[test]
    fn key_builders() {
        assert_eq!(job_key("echo_1700000000"), "scheduler:job:echo_1700000000");
        assert_eq!(
            job_lock_key("echo_1700000000"),
            "schedulerx:job_lock:echo_1700000000"
        );
    }
}
