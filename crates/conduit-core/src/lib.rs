//! # conduit-core
//!
//! Foundation types shared by every Conduit crate:
//!
//! - **Branded IDs**: `ConnectionId`, `InstanceId` as newtypes for type safety
//! - **Envelope**: `MessageEnvelope`, the wire unit clients send
//! - **Identity**: user and tenant claims from the session authority
//! - **Lifecycle**: close codes, rejection/eviction/disconnect reasons, `GatewayEvent`
//! - **Errors**: the `GatewayError` taxonomy via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod lifecycle;
pub mod logging;

pub use envelope::MessageEnvelope;
pub use errors::{EnvelopeError, GatewayError};
pub use identity::Identity;
pub use ids::{ConnectionId, InstanceId};
pub use lifecycle::{CloseCode, DisconnectReason, EvictionReason, GatewayEvent, RejectReason};
