//! In-process store with TTL semantics matching Redis.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused
//! clock. Expired keys are removed lazily on access.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::store::{Fields, RegistryStore, StoreError};

enum Value {
    Hash(Fields),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-process registry store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        let _ = entries.remove(key);
    }
    entries.get_mut(key)
}

fn hset(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    fields: &Fields,
    ttl: Duration,
) -> Result<(), StoreError> {
    let expires_at = Some(Instant::now() + ttl);
    match live(entries, key) {
        Some(Entry {
            value: Value::Hash(existing),
            expires_at: exp,
        }) => {
            existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            *exp = expires_at;
        }
        Some(_) => return Err(StoreError::WrongType(key.to_owned())),
        None => {
            let _ = entries.insert(
                key.to_owned(),
                Entry {
                    value: Value::Hash(fields.clone()),
                    expires_at,
                },
            );
        }
    }
    Ok(())
}

fn sadd(entries: &mut HashMap<String, Entry>, set_key: &str, member: &str) -> Result<(), StoreError> {
    match live(entries, set_key) {
        Some(Entry {
            value: Value::Set(members),
            ..
        }) => {
            let _ = members.insert(member.to_owned());
        }
        Some(_) => return Err(StoreError::WrongType(set_key.to_owned())),
        None => {
            let _ = entries.insert(
                set_key.to_owned(),
                Entry {
                    value: Value::Set(BTreeSet::from([member.to_owned()])),
                    expires_at: None,
                },
            );
        }
    }
    Ok(())
}

fn srem(entries: &mut HashMap<String, Entry>, set_key: &str, member: &str) -> Result<(), StoreError> {
    let now_empty = match live(entries, set_key) {
        Some(Entry {
            value: Value::Set(members),
            ..
        }) => {
            let _ = members.remove(member);
            members.is_empty()
        }
        Some(_) => return Err(StoreError::WrongType(set_key.to_owned())),
        None => false,
    };
    if now_empty {
        let _ = entries.remove(set_key);
    }
    Ok(())
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn set(&self, key: &str, fields: &Fields, ttl: Duration) -> Result<(), StoreError> {
        hset(&mut self.entries.lock(), key, fields, ttl)
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, StoreError> {
        match live(&mut self.entries.lock(), key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _ = self.entries.lock().remove(key);
        Ok(())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        sadd(&mut self.entries.lock(), set_key, member)
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        srem(&mut self.entries.lock(), set_key, member)
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, StoreError> {
        match live(&mut self.entries.lock(), set_key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(set_key.to_owned())),
            None => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(match live(&mut self.entries.lock(), key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn update_existing(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        if live(&mut entries, key).is_none() {
            return Ok(false);
        }
        hset(&mut entries, key, fields, ttl)?;
        Ok(true)
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
        let mut entries = self.entries.lock();
        if live(&mut entries, key).is_none() {
            return Ok(false);
        }
        hset(&mut entries, key, fields, ttl)?;
        srem(&mut entries, from_set, member)?;
        sadd(&mut entries, to_set, member)?;
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(live(&mut self.entries.lock(), key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn set_indexed(
        &self,
        key: &str,
        fields: &Fields,
        ttl: Duration,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        hset(&mut entries, key, fields, ttl)?;
        sadd(&mut entries, set_key, member)
    }

    async fn delete_indexed(
        &self,
        key: &str,
        set_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let _ = entries.remove(key);
        srem(&mut entries, set_key, member)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
