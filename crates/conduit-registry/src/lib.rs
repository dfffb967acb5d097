//! # conduit-registry
//!
//! Shared, expiring connection registry. Every gateway instance mirrors the
//! connections it owns here so that replies and stats work across the
//! cluster.
//!
//! - [`RegistryStore`]: key-value seam (hash records, set indexes, TTLs)
//! - [`MemoryStore`]: in-process store for single-instance runs and tests
//! - `RedisStore` (feature `redis`): Redis hashes and sets
//! - [`ConnectionRegistry`]: typed client over a store
//! - [`testing::SwitchableStore`]: a store that can be taken down in tests

#![deny(unsafe_code)]

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod testing;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use registry::{ConnectionRecord, ConnectionRegistry, RegistryError};
pub use store::{Fields, RegistryStore, StoreError};
