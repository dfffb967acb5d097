//! # conduit-bus
//!
//! Shared publish/subscribe medium used for two purposes: delivering
//! logical-channel messages to consumers, and routing replies back to the
//! gateway instance that owns a connection.
//!
//! - [`FanOutBus`]: publish, subscribe, subscriber count, health
//! - [`Subscription`]: message channel; dropping it unsubscribes
//! - [`MemoryBus`]: in-process implementation
//! - `RedisBus` (feature `redis`): Redis `PUBLISH`/`SUBSCRIBE`

#![deny(unsafe_code)]

pub mod bus;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_bus;

pub use bus::{BusError, FanOutBus, SUBSCRIPTION_BUFFER, Subscription};
pub use memory::MemoryBus;
#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;
