//! Connection registry client.
//!
//! Mirrors each locally owned connection into the shared store so any
//! instance can find which instance owns a connection and which channel it
//! belongs to.
//!
//! Key layout (`prefix` defaults to `conduit:`):
//!
//! | Key | Kind | Content |
//! |-----|------|---------|
//! | `{prefix}conn:{id}` | hash, TTL | [`ConnectionRecord`] fields |
//! | `{prefix}channel:{name}` | set | connection IDs on that channel |
//! | `{prefix}channels` | set | every channel name ever indexed |
//!
//! Index sets have no TTL; members whose record has expired are pruned the
//! next time the channel is listed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use conduit_core::{ConnectionId, GatewayError, InstanceId};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::store::{Fields, RegistryStore, StoreError};

/// Registry client failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No live record for the connection.
    #[error("connection {0} not found in registry")]
    NotFound(ConnectionId),
    /// The backing store is unreachable; callers degrade to local-only.
    #[error("registry unavailable: {0}")]
    Unavailable(#[from] StoreError),
    /// A stored record is missing fields or has unparsable values.
    #[error("corrupt registry record for {id}: {reason}")]
    Corrupt {
        /// Affected connection.
        id: ConnectionId,
        /// What was wrong.
        reason: String,
    },
}

impl RegistryError {
    /// Whether this is the store-unreachable class.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        GatewayError::RegistryUnavailable(err.to_string())
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry mirror of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// The connection.
    pub connection_id: ConnectionId,
    /// Its current logical channel.
    pub channel: String,
    /// Instance holding the socket.
    pub owning_instance_id: InstanceId,
    /// Authenticated user.
    pub user_id: String,
    /// Tenant, if any.
    pub tenant_id: Option<String>,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
    /// Last answered heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Last inbound frame of any kind, as of the last heartbeat.
    pub last_activity_at: DateTime<Utc>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ConnectionRecord {
    fn to_fields(&self) -> Fields {
        let mut fields = BTreeMap::from([
            ("connection_id".to_string(), self.connection_id.to_string()),
            ("channel".to_string(), self.channel.clone()),
            (
                "owning_instance_id".to_string(),
                self.owning_instance_id.to_string(),
            ),
            ("user_id".to_string(), self.user_id.clone()),
            ("connected_at".to_string(), timestamp(self.connected_at)),
            (
                "last_heartbeat_at".to_string(),
                timestamp(self.last_heartbeat_at),
            ),
            (
                "last_activity_at".to_string(),
                timestamp(self.last_activity_at),
            ),
        ]);
        if let Some(tenant) = &self.tenant_id {
            let _ = fields.insert("tenant_id".to_string(), tenant.clone());
        }
        fields
    }

    fn from_fields(id: &ConnectionId, mut fields: Fields) -> Result<Self> {
        let corrupt = |reason: String| RegistryError::Corrupt {
            id: id.clone(),
            reason,
        };
        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| corrupt(format!("missing field {name}")))
        };
        let parse_time = |raw: String| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {raw}: {e}")))
        };

        let channel = take("channel")?;
        let owning_instance_id = InstanceId::from(take("owning_instance_id")?);
        let user_id = take("user_id")?;
        let connected_at = parse_time(take("connected_at")?)?;
        let last_heartbeat_at = parse_time(take("last_heartbeat_at")?)?;
        let last_activity_at = parse_time(take("last_activity_at")?)?;
        let tenant_id = fields.remove("tenant_id");

        Ok(Self {
            connection_id: id.clone(),
            channel,
            owning_instance_id,
            user_id,
            tenant_id,
            connected_at,
            last_heartbeat_at,
            last_activity_at,
        })
    }
}

/// Typed client over a [`RegistryStore`].
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn RegistryStore>,
    prefix: String,
    min_ttl: Duration,
}

impl ConnectionRegistry {
    /// Create a client. Every TTL handed to the store is raised to at least
    /// `min_ttl` (the max idle time), so an entry can never expire before
    /// the eviction sweep would have removed its connection.
    pub fn new(store: Arc<dyn RegistryStore>, prefix: impl Into<String>, min_ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            min_ttl,
        }
    }

    /// Floor applied to every TTL.
    pub fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    fn record_key(&self, id: &ConnectionId) -> String {
        format!("{}conn:{id}", self.prefix)
    }

    fn channel_key(&self, channel: &str) -> String {
        format!("{}channel:{channel}", self.prefix)
    }

    fn channels_key(&self) -> String {
        format!("{}channels", self.prefix)
    }

    fn effective_ttl(&self, ttl: Duration) -> Duration {
        ttl.max(self.min_ttl)
    }

    /// Write the record and index it under its channel.
    #[instrument(skip_all, fields(connection_id = %record.connection_id, channel = %record.channel))]
    pub async fn register(&self, record: &ConnectionRecord, ttl: Duration) -> Result<()> {
        let id = record.connection_id.as_str();
        self.store
            .set_indexed(
                &self.record_key(&record.connection_id),
                &record.to_fields(),
                self.effective_ttl(ttl),
                &self.channel_key(&record.channel),
                id,
            )
            .await?;
        self.store
            .set_add(&self.channels_key(), &record.channel)
            .await?;
        debug!("connection registered");
        Ok(())
    }

    /// Read a connection's record.
    pub async fn get(&self, id: &ConnectionId) -> Result<ConnectionRecord> {
        match self.store.get(&self.record_key(id)).await? {
            Some(fields) => ConnectionRecord::from_fields(id, fields),
            None => Err(RegistryError::NotFound(id.clone())),
        }
    }

    /// Connections currently indexed under `channel`.
    ///
    /// Index members whose record has expired are removed from the index.
    pub async fn list_by_channel(&self, channel: &str) -> Result<Vec<ConnectionId>> {
        let set_key = self.channel_key(channel);
        let members = self.store.set_members(&set_key).await?;
        let mut live = Vec::with_capacity(members.len());
        for member in members {
            let id = ConnectionId::from(member);
            match self.store.get(&self.record_key(&id)).await? {
                Some(fields) if fields.get("channel").map(String::as_str) == Some(channel) => {
                    live.push(id);
                }
                _ => {
                    debug!(connection_id = %id, channel, "pruning stale index member");
                    self.store.set_remove(&set_key, id.as_str()).await?;
                }
            }
        }
        Ok(live)
    }

    /// Remove a connection's record and index entry. Unknown IDs succeed.
    #[instrument(skip_all, fields(connection_id = %id))]
    pub async fn unregister(&self, id: &ConnectionId) -> Result<()> {
        let key = self.record_key(id);
        match self.store.get(&key).await? {
            Some(fields) => {
                let channel = fields.get("channel").cloned().unwrap_or_default();
                self.store
                    .delete_indexed(&key, &self.channel_key(&channel), id.as_str())
                    .await?;
                debug!("connection unregistered");
            }
            None => self.store.delete(&key).await?,
        }
        Ok(())
    }

    /// Push a connection's expiry out to `ttl` from now. Returns `false` if
    /// the record no longer exists.
    pub async fn refresh_ttl(&self, id: &ConnectionId, ttl: Duration) -> Result<bool> {
        Ok(self
            .store
            .expire(&self.record_key(id), self.effective_ttl(ttl))
            .await?)
    }

    /// Record an answered heartbeat, carry the latest activity time, and
    /// refresh the TTL.
    ///
    /// Writes only if the record still exists, in one store operation, so
    /// a heartbeat racing a teardown cannot resurrect a partial entry.
    /// Returns `false` if the record was missing.
    pub async fn record_heartbeat(
        &self,
        id: &ConnectionId,
        at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let fields = Fields::from([
            ("last_heartbeat_at".to_string(), timestamp(at)),
            ("last_activity_at".to_string(), timestamp(last_activity_at)),
        ]);
        Ok(self
            .store
            .update_existing(&self.record_key(id), &fields, self.effective_ttl(ttl))
            .await?)
    }

    /// Move a connection from one channel index to another.
    ///
    /// The record update and both index changes happen only if the record
    /// still exists; otherwise nothing is written and `NotFound` is
    /// returned.
    #[instrument(skip_all, fields(connection_id = %id, from, to))]
    pub async fn move_channel(
        &self,
        id: &ConnectionId,
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let fields = Fields::from([("channel".to_string(), to.to_string())]);
        let moved = self
            .store
            .update_existing_reindexed(
                &self.record_key(id),
                &fields,
                self.effective_ttl(ttl),
                &self.channel_key(from),
                &self.channel_key(to),
                id.as_str(),
            )
            .await?;
        if !moved {
            return Err(RegistryError::NotFound(id.clone()));
        }
        self.store.set_add(&self.channels_key(), to).await?;
        Ok(())
    }

    /// Live connection count per channel, across all instances.
    pub async fn count_by_channel(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for channel in self.store.set_members(&self.channels_key()).await? {
            let n = self.list_by_channel(&channel).await?.len();
            if n > 0 {
                let _ = counts.insert(channel, n);
            }
        }
        Ok(counts)
    }

    /// Live connection count across all instances.
    pub async fn count_all(&self) -> Result<usize> {
        Ok(self.count_by_channel().await?.values().sum())
    }

    /// Remaining TTL of a connection's record.
    pub async fn ttl(&self, id: &ConnectionId) -> Result<Option<Duration>> {
        Ok(self.store.ttl(&self.record_key(id)).await?)
    }

    /// Whether the backing store answers.
    pub async fn is_healthy(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "registry health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    const IDLE: Duration = Duration::from_secs(300);

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(MemoryStore::new()), "test:", IDLE)
    }

    fn record(id: &str, channel: &str) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            connection_id: ConnectionId::from(id),
            channel: channel.to_string(),
            owning_instance_id: InstanceId::from("gw_a"),
            user_id: "alice".to_string(),
            tenant_id: Some("acme".to_string()),
            connected_at: now,
            last_heartbeat_at: now,
            last_activity_at: now,
        }
    }

    #[tokio::test]
    async fn register_then_get_roundtrips_metadata() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();

        let got = reg.get(&rec.connection_id).await.unwrap();
        assert_eq!(got.channel, "guide");
        assert_eq!(got.owning_instance_id.as_str(), "gw_a");
        assert_eq!(got.user_id, "alice");
        assert_eq!(got.tenant_id.as_deref(), Some("acme"));
        assert_eq!(
            got.connected_at.timestamp_millis(),
            rec.connected_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let reg = registry();
        assert_matches!(
            reg.get(&ConnectionId::from("conn_x")).await,
            Err(RegistryError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn list_by_channel_uses_index() {
        let reg = registry();
        reg.register(&record("conn_1", "guide"), IDLE).await.unwrap();
        reg.register(&record("conn_2", "guide"), IDLE).await.unwrap();
        reg.register(&record("conn_3", "pillar:content"), IDLE)
            .await
            .unwrap();

        let mut guide = reg.list_by_channel("guide").await.unwrap();
        guide.sort();
        assert_eq!(
            guide,
            vec![ConnectionId::from("conn_1"), ConnectionId::from("conn_2")]
        );
        assert_eq!(reg.list_by_channel("pillar:content").await.unwrap().len(), 1);
        assert!(reg.list_by_channel("pillar:insights").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_removes_record_and_index() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();
        reg.unregister(&rec.connection_id).await.unwrap();

        assert_matches!(
            reg.get(&rec.connection_id).await,
            Err(RegistryError::NotFound(_))
        );
        assert!(reg.list_by_channel("guide").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();
        reg.unregister(&rec.connection_id).await.unwrap();
        reg.unregister(&rec.connection_id).await.unwrap();
        reg.unregister(&ConnectionId::from("conn_never")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_expiry_to_at_least_idle() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        // A smaller TTL is clamped up to the idle floor.
        assert!(reg.refresh_ttl(&rec.connection_id, Duration::from_secs(5)).await.unwrap());
        let ttl = reg.ttl(&rec.connection_id).await.unwrap().unwrap();
        assert!(ttl >= IDLE);

        tokio::time::advance(Duration::from_secs(250)).await;
        assert!(reg.get(&rec.connection_id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_records_pruned_from_index() {
        let reg = registry();
        reg.register(&record("conn_1", "guide"), IDLE).await.unwrap();
        tokio::time::advance(IDLE + Duration::from_secs(1)).await;

        assert!(reg.list_by_channel("guide").await.unwrap().is_empty());
        assert!(!reg.refresh_ttl(&ConnectionId::from("conn_1"), IDLE).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_updates_timestamp_only_for_live_records() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();

        let later = rec.last_heartbeat_at + chrono::Duration::seconds(30);
        assert!(reg.record_heartbeat(&rec.connection_id, later, later, IDLE).await.unwrap());
        let got = reg.get(&rec.connection_id).await.unwrap();
        assert_eq!(got.last_heartbeat_at.timestamp(), later.timestamp());
        assert_eq!(got.last_activity_at.timestamp(), later.timestamp());

        reg.unregister(&rec.connection_id).await.unwrap();
        assert!(!reg.record_heartbeat(&rec.connection_id, later, later, IDLE).await.unwrap());
        assert_matches!(
            reg.get(&rec.connection_id).await,
            Err(RegistryError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn move_channel_reindexes() {
        let reg = registry();
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();
        reg.move_channel(&rec.connection_id, "guide", "pillar:insights", IDLE)
            .await
            .unwrap();

        assert!(reg.list_by_channel("guide").await.unwrap().is_empty());
        assert_eq!(
            reg.list_by_channel("pillar:insights").await.unwrap(),
            vec![rec.connection_id.clone()]
        );
        assert_eq!(reg.get(&rec.connection_id).await.unwrap().channel, "pillar:insights");
    }

    #[tokio::test]
    async fn move_channel_of_missing_record_writes_nothing() {
        let reg = registry();
        let id = ConnectionId::from("conn_gone");
        assert_matches!(
            reg.move_channel(&id, "guide", "pillar:insights", IDLE).await,
            Err(RegistryError::NotFound(_))
        );
        assert_matches!(reg.get(&id).await, Err(RegistryError::NotFound(_)));
        assert!(reg.list_by_channel("pillar:insights").await.unwrap().is_empty());
    }

    /// Wraps a store and, once armed, deletes a record (and its index
    /// entry) right after the next store call returns: the interleaving a
    /// concurrent teardown can produce.
    struct InterleavedTeardown {
        inner: MemoryStore,
        armed: parking_lot::Mutex<Option<(String, String, String)>>,
    }

    impl InterleavedTeardown {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                armed: parking_lot::Mutex::new(None),
            }
        }

        fn arm(&self, key: &str, set_key: &str, member: &str) {
            *self.armed.lock() = Some((key.into(), set_key.into(), member.into()));
        }

        async fn after_call(&self) {
            let armed = self.armed.lock().take();
            if let Some((key, set_key, member)) = armed {
                self.inner.delete_indexed(&key, &set_key, &member).await.unwrap();
            }
        }
    }

    #[async_trait]
    impl RegistryStore for InterleavedTeardown {
        async fn set(&self, k: &str, f: &Fields, t: Duration) -> std::result::Result<(), StoreError> {
            let r = self.inner.set(k, f, t).await;
            self.after_call().await;
            r
        }
        async fn get(&self, k: &str) -> std::result::Result<Option<Fields>, StoreError> {
            let r = self.inner.get(k).await;
            self.after_call().await;
            r
        }
        async fn delete(&self, k: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(k).await
        }
        async fn set_add(&self, s: &str, m: &str) -> std::result::Result<(), StoreError> {
            let r = self.inner.set_add(s, m).await;
            self.after_call().await;
            r
        }
        async fn set_remove(&self, s: &str, m: &str) -> std::result::Result<(), StoreError> {
            let r = self.inner.set_remove(s, m).await;
            self.after_call().await;
            r
        }
        async fn set_members(&self, s: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.set_members(s).await
        }
        async fn expire(&self, k: &str, t: Duration) -> std::result::Result<bool, StoreError> {
            let r = self.inner.expire(k, t).await;
            self.after_call().await;
            r
        }
        async fn update_existing(
            &self,
            k: &str,
            f: &Fields,
            t: Duration,
        ) -> std::result::Result<bool, StoreError> {
            let r = self.inner.update_existing(k, f, t).await;
            self.after_call().await;
            r
        }
        async fn update_existing_reindexed(
            &self,
            k: &str,
            f: &Fields,
            t: Duration,
            from: &str,
            to: &str,
            m: &str,
        ) -> std::result::Result<bool, StoreError> {
            let r = self.inner.update_existing_reindexed(k, f, t, from, to, m).await;
            self.after_call().await;
            r
        }
        async fn ttl(&self, k: &str) -> std::result::Result<Option<Duration>, StoreError> {
            self.inner.ttl(k).await
        }
        async fn set_indexed(
            &self,
            k: &str,
            f: &Fields,
            t: Duration,
            s: &str,
            m: &str,
        ) -> std::result::Result<(), StoreError> {
            self.inner.set_indexed(k, f, t, s, m).await
        }
        async fn delete_indexed(&self, k: &str, s: &str, m: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete_indexed(k, s, m).await
        }
        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn heartbeat_racing_teardown_leaves_no_record() {
        let store = Arc::new(InterleavedTeardown::new());
        let reg = ConnectionRegistry::new(store.clone(), "test:", IDLE);
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();

        store.arm("test:conn:conn_1", "test:channel:guide", "conn_1");
        let later = rec.last_heartbeat_at + chrono::Duration::seconds(30);
        let _ = reg.record_heartbeat(&rec.connection_id, later, later, IDLE).await.unwrap();

        assert_matches!(
            reg.get(&rec.connection_id).await,
            Err(RegistryError::NotFound(_))
        );
        assert_eq!(reg.ttl(&rec.connection_id).await.unwrap(), None);
        assert!(!reg.record_heartbeat(&rec.connection_id, later, later, IDLE).await.unwrap());
        assert_eq!(reg.ttl(&rec.connection_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn channel_move_racing_teardown_leaves_no_record() {
        let store = Arc::new(InterleavedTeardown::new());
        let reg = ConnectionRegistry::new(store.clone(), "test:", IDLE);
        let rec = record("conn_1", "guide");
        reg.register(&rec, IDLE).await.unwrap();

        store.arm("test:conn:conn_1", "test:channel:pillar:insights", "conn_1");
        reg.move_channel(&rec.connection_id, "guide", "pillar:insights", IDLE)
            .await
            .unwrap();

        assert_matches!(
            reg.get(&rec.connection_id).await,
            Err(RegistryError::NotFound(_))
        );
        assert_eq!(reg.ttl(&rec.connection_id).await.unwrap(), None);
        assert!(reg.list_by_channel("guide").await.unwrap().is_empty());
        assert!(reg.list_by_channel("pillar:insights").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_by_channel() {
        let reg = registry();
        reg.register(&record("conn_1", "guide"), IDLE).await.unwrap();
        reg.register(&record("conn_2", "guide"), IDLE).await.unwrap();
        reg.register(&record("conn_3", "pillar:content"), IDLE)
            .await
            .unwrap();
        reg.unregister(&ConnectionId::from("conn_3")).await.unwrap();

        let counts = reg.count_by_channel().await.unwrap();
        assert_eq!(counts.get("guide"), Some(&2));
        assert!(!counts.contains_key("pillar:content"));
        assert_eq!(reg.count_all().await.unwrap(), 2);
    }

    struct DownStore;

    #[async_trait]
    impl RegistryStore for DownStore {
        async fn set(&self, _: &str, _: &Fields, _: Duration) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get(&self, _: &str) -> std::result::Result<Option<Fields>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_add(&self, _: &str, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_remove(&self, _: &str, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_members(&self, _: &str) -> std::result::Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn update_existing(
            &self,
            _: &str,
            _: &Fields,
            _: Duration,
        ) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn update_existing_reindexed(
            &self,
            _: &str,
            _: &Fields,
            _: Duration,
            _: &str,
            _: &str,
            _: &str,
        ) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ttl(&self, _: &str) -> std::result::Result<Option<Duration>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set_indexed(
            &self,
            _: &str,
            _: &Fields,
            _: Duration,
            _: &str,
            _: &str,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_indexed(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn ping(&self) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_maps_to_unavailable() {
        let reg = ConnectionRegistry::new(Arc::new(DownStore), "test:", IDLE);
        let err = reg.register(&record("conn_1", "guide"), IDLE).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!reg.is_healthy().await);

        let gateway_err: GatewayError = err.into();
        assert_matches!(gateway_err, GatewayError::RegistryUnavailable(_));
    }
}
