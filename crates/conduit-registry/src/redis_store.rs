//! Redis-backed registry store.
//!
//! Hashes hold connection records, sets hold channel indexes. Indexed
//! writes run as a `MULTI`/`EXEC` pipeline so the primary key and its index
//! never diverge. Conditional updates run as Lua scripts so the existence
//! check and the write are one server-side step.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use crate::store::{Fields, RegistryStore, StoreError};

/// Default deadline for a single Redis round trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

// KEYS[1] record; ARGV[1] ttl ms, ARGV[2..] field/value pairs.
const UPDATE_EXISTING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return 1
";

// KEYS[1] record, KEYS[2] from set, KEYS[3] to set; ARGV[1] ttl ms,
// ARGV[2] member, ARGV[3..] field/value pairs.
const UPDATE_EXISTING_REINDEXED: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
redis.call('PEXPIRE', KEYS[1], ARGV[1])
redis.call('SREM', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[2])
return 1
";

/// Registry store on a shared Redis server.
pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
    update_existing: redis::Script,
    update_existing_reindexed: redis::Script,
}

fn millis(ttl: Duration) -> i64 {
    ttl.as_millis().max(1) as i64
}

fn pairs(fields: &Fields) -> Vec<(&str, &str)> {
    fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

impl RedisStore {
    /// Open a client for `url`. Only the URL is checked here; the first
    /// operation connects.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: OnceCell::new(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
            update_existing: redis::Script::new(UPDATE_EXISTING),
            update_existing_reindexed: redis::Script::new(UPDATE_EXISTING_REINDEXED),
        })
    }

    /// Override the per-operation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.connection
            .get_or_try_init(|| self.bounded(ConnectionManager::new(self.client.clone())))
            .await
            .cloned()
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl RegistryStore for RedisStore {
    async fn set(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<(), StoreError> {
        if fields.is_empty() {
            return self.expire(key, ttl).await.map(|_| ());
        }
        let mut conn = self.connection().await?;
        self.bounded(async move {
            redis::pipe()
                .atomic()
                .hset_multiple(key, &pairs(fields))
                .ignore()
                .pexpire(key, millis(ttl))
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, StoreError> {
        let mut conn = self.connection().await?;
        let map: HashMap<String, String> =
            self.bounded(async move { conn.hgetall(key).await }).await?;
        Ok((!map.is_empty()).then(|| map.into_iter().collect()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.del(key).await }).await
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.sadd(set_key, member).await })
            .await
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.srem(set_key, member).await })
            .await
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.smembers(set_key).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move { conn.pexpire(key, millis(ttl)).await })
            .await
    }

    async fn update_existing(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if fields.is_empty() {
            return self.expire(key, ttl).await;
        }
        let mut invocation = self.update_existing.key(key);
        let _ = invocation.arg(millis(ttl));
        for (field, value) in fields {
            let _ = invocation.arg(field).arg(value);
        }
        let mut conn = self.connection().await?;
        let written: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }

    async fn update_existing_reindexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        from_set: &str,
        to_set: &str,
        member: &str,
    ) -> Result<bool, StoreError> {
        let mut invocation = self.update_existing_reindexed.key(key);
        let _ = invocation.key(from_set).key(to_set).arg(millis(ttl)).arg(member);
        for (field, value) in fields {
            let _ = invocation.arg(field).arg(value);
        }
        let mut conn = self.connection().await?;
        let written: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(written == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection().await?;
        let ms: i64 = self.bounded(async move { conn.pttl(key).await }).await?;
        // -2: no key, -1: no expiry
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn set_indexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move {
            redis::pipe()
                .atomic()
                .hset_multiple(key, &pairs(fields))
                .ignore()
                .pexpire(key, millis(ttl))
                .ignore()
                .sadd(set_key, member)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn delete_indexed(
        &self,
        key: &str,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move {
            redis::pipe()
                .atomic()
                .del(key)
                .ignore()
                .srem(set_key, member)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _pong: String = self
            .bounded(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on port 1.
    const UNREACHABLE: &str = "redis://127.0.0.1:1";

    #[test]
    fn open_rejects_bad_url() {
        assert!(RedisStore::open("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_server_fails_each_call() {
        let store = RedisStore::open(UNREACHABLE)
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        assert!(store.ping().await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.ping().await.is_err());
    }
}
