//! Test helpers for exercising registry outages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::memory::MemoryStore;
use crate::store::{Fields, RegistryStore, StoreError};

/// A [`MemoryStore`] that can be switched off. While down, every call
/// fails with [`StoreError::Unavailable`] and the data is left untouched.
#[derive(Default)]
pub struct SwitchableStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl SwitchableStore {
    /// A reachable, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (`true`) or succeed again (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// The underlying data, bypassing the switch.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RegistryStore for SwitchableStore {
    async fn set(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, fields, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_add(set_key, member).await
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_remove(set_key, member).await
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.set_members(set_key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn update_existing(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.update_existing(key, fields, ttl).await
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
        self.check()?;
        self.inner
            .update_existing_reindexed(key, fields, ttl, from_set, to_set, member)
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn set_indexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_indexed(key, fields, ttl, set_key, member).await
    }

    async fn delete_indexed(
        &self,
        key: &str,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_indexed(key, set_key, member).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn switch_off_then_on() {
        let store = SwitchableStore::new();
        let ttl = Duration::from_secs(10);
        store.set("k", &Fields::new(), ttl).await.unwrap();

        store.set_down(true);
        assert!(store.ping().await.is_err());
        assert!(store.set_add("s", "a").await.is_err());
        assert!(store.inner().set_members("s").await.unwrap().is_empty());

        store.set_down(false);
        store.set_add("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a"]);
    }
}
