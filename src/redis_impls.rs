use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::{
    config::Config,
    error::{Error, Result},
    store::Store,
};

/// Concrete [`Store`] backed by Redis.
///
/// Uses a [`ConnectionManager`], which multiplexes one connection and
/// reconnects transparently; clones share it, so the whole process holds a
/// single connection regardless of how many loops run.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect using the `CACHE_*` settings and verify the server responds.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = redis::Client::open(config.store_url())
            .map_err(|e| Error::Config(format!("invalid store URL: {e}")))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(store_err)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects EX 0; a sub-second TTL rounds up to one second.
    ttl.as_secs().max(1)
}

impl Store for RedisStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        async move {
            redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_err)
        }
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl_secs(ttl));
            }
            let _: () = cmd.query_async(&mut conn).await.map_err(store_err)?;
            Ok(())
        }
    }

    fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        async move {
            // SET ... NX replies OK on acquisition and nil when the key is held.
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(reply.is_some())
        }
    }

    fn del(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        async move {
            let _: () = redis::cmd("DEL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(())
        }
    }

    fn zadd(&self, key: &str, score: f64, member: &str) -> impl Future<Output = Result<()>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let member = member.to_string();
        async move {
            let _: () = redis::cmd("ZADD")
                .arg(&key)
                .arg(score)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(())
        }
    }

    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        async move {
            redis::cmd("ZRANGE")
                .arg(&key)
                .arg(start)
                .arg(stop)
                .query_async(&mut conn)
                .await
                .map_err(store_err)
        }
    }

    fn zrem(&self, key: &str, member: &str) -> impl Future<Output = Result<()>> + Send {
        let mut conn = self.conn.clone();
        let key = key.to_string();
        let member = member.to_string();
        async move {
            let _: () = redis::cmd("ZREM")
                .arg(&key)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            Ok(())
        }
    }
}
