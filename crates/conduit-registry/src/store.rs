//! Key-value store seam behind the connection registry.
//!
//! Every operation touches a single key, or a primary key and its index sets
//! in a single atomic batch, so concurrent gateway instances need no
//! application-level locking. Updates to an existing record go through the
//! `update_existing*` operations, which never recreate a deleted key.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Field map stored under a primary key.
pub type Fields = BTreeMap<String, String>;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A store call exceeded its deadline.
    #[error("store operation timed out")]
    Timeout,
    /// A key holds a value of the wrong kind.
    #[error("wrong value kind at key {0}")]
    WrongType(String),
    /// Redis reported an error.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Expiring key-value store shared by all gateway instances.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Merge `fields` into the hash at `key` and set its TTL.
    async fn set(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<(), StoreError>;

    /// Read the hash at `key`; `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Fields>, StoreError>;

    /// Remove `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Add `member` to the set at `set_key`.
    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove `member` from the set at `set_key`.
    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of the set at `set_key`.
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, StoreError>;

    /// Reset the TTL of `key`. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Merge `fields` into the hash at `key` and reset its TTL, but only if
    /// the key exists. Returns `false`, having written nothing, otherwise.
    async fn update_existing(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// [`update_existing`](Self::update_existing) plus moving `member` from
    /// `from_set` to `to_set`, atomically. Nothing is written if the key is
    /// absent.
    async fn update_existing_reindexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        from_set: &str,
        to_set: &str,
        member: &str,
    ) -> Result<bool, StoreError>;

    /// Remaining TTL of `key`; `None` if absent or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// [`set`](Self::set) plus [`set_add`](Self::set_add), atomically.
    async fn set_indexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError>;

    /// [`delete`](Self::delete) plus [`set_remove`](Self::set_remove), atomically.
    async fn delete_indexed(&self, key: &str, set_key: &str, member: &str)
    -> Result<(), StoreError>;

    /// Round-trip liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}
