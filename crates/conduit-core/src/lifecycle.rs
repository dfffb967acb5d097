//! Connection lifecycle reasons, close codes, and events.
//!
//! Every way a connection can end maps to a WebSocket close code plus a
//! machine-readable reason string that clients can switch on.

use serde::{Deserialize, Serialize};

use crate::ids::ConnectionId;

/// A WebSocket close code with its reason string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseCode {
    /// Numeric close code sent in the close frame.
    pub code: u16,
    /// Machine-readable reason sent in the close frame.
    pub reason: &'static str,
}

/// Why a handshake was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Token missing, invalid, expired, or validation timed out.
    InvalidSession,
    /// The `Origin` header is not on the configured allow-list.
    OriginNotAllowed,
    /// The identity already holds its maximum number of connections.
    ConnectionLimitExceeded,
    /// This instance holds its maximum number of connections.
    ServerAtCapacity,
}

impl RejectReason {
    /// Reason string used in close frames and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSession => "invalid_session",
            Self::OriginNotAllowed => "origin_not_allowed",
            Self::ConnectionLimitExceeded => "connection_limit_exceeded",
            Self::ServerAtCapacity => "server_at_capacity",
        }
    }

    /// Close frame for this rejection.
    pub fn close_code(self) -> CloseCode {
        let code = match self {
            Self::InvalidSession => 4001,
            Self::OriginNotAllowed => 4003,
            Self::ConnectionLimitExceeded => 4004,
            Self::ServerAtCapacity => 4005,
        };
        CloseCode {
            code,
            reason: self.as_str(),
        }
    }
}

/// Why a connection was proactively evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// No heartbeat for longer than the max idle time.
    IdleTimeout,
    /// A ping could not be sent or was not answered in time.
    HeartbeatFailed,
    /// The connection has no running liveness monitor.
    NoHeartbeat,
}

impl EvictionReason {
    /// Reason string used in close frames, events, and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle_timeout",
            Self::HeartbeatFailed => "heartbeat_failed",
            Self::NoHeartbeat => "no_heartbeat",
        }
    }

    /// Close frame for this eviction.
    pub fn close_code(self) -> CloseCode {
        let code = match self {
            Self::IdleTimeout => 4008,
            Self::HeartbeatFailed => 4009,
            Self::NoHeartbeat => 4010,
        };
        CloseCode {
            code,
            reason: self.as_str(),
        }
    }
}

/// Why an accepted connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum DisconnectReason {
    /// The client closed the socket or the read side ended.
    ClientClosed,
    /// Writing to the socket failed.
    WriteFailed,
    /// The client exceeded its inbound message rate.
    RateLimited,
    /// The instance is shutting down.
    ShuttingDown,
    /// The bus subscription carrying replies ended and could not be
    /// re-established.
    ReplyPathLost,
    /// The gateway evicted the connection.
    Evicted(EvictionReason),
}

impl DisconnectReason {
    /// Reason string used in metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::WriteFailed => "write_failed",
            Self::RateLimited => "rate_limited",
            Self::ShuttingDown => "shutting_down",
            Self::ReplyPathLost => "reply_path_lost",
            Self::Evicted(reason) => reason.as_str(),
        }
    }

    /// Close frame the server sends, if the server initiates the close.
    pub fn close_code(self) -> Option<CloseCode> {
        match self {
            Self::ClientClosed | Self::WriteFailed => None,
            Self::RateLimited => Some(CloseCode {
                code: 4029,
                reason: "rate_limited",
            }),
            Self::ShuttingDown => Some(CloseCode {
                code: 1001,
                reason: "shutting_down",
            }),
            Self::ReplyPathLost => Some(CloseCode {
                code: 1011,
                reason: "reply_path_lost",
            }),
            Self::Evicted(reason) => Some(reason.close_code()),
        }
    }
}

/// Lifecycle notification published on the gateway's event channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A connection was accepted.
    Connected {
        /// The new connection.
        connection_id: ConnectionId,
        /// Its initial channel.
        channel: String,
    },
    /// A connection ended for a reason other than eviction.
    Disconnected {
        /// The closed connection.
        connection_id: ConnectionId,
        /// Why it ended.
        reason: DisconnectReason,
    },
    /// A connection was evicted.
    Evicted {
        /// The evicted connection.
        connection_id: ConnectionId,
        /// Why it was evicted.
        reason: EvictionReason,
    },
}

impl GatewayEvent {
    /// The connection this event concerns.
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::Connected { connection_id, .. }
            | Self::Disconnected { connection_id, .. }
            | Self::Evicted { connection_id, .. } => connection_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_codes() {
        assert_eq!(RejectReason::InvalidSession.close_code().code, 4001);
        assert_eq!(RejectReason::OriginNotAllowed.close_code().code, 4003);
        assert_eq!(RejectReason::ConnectionLimitExceeded.close_code().code, 4004);
        assert_eq!(RejectReason::ServerAtCapacity.close_code().code, 4005);
        assert_eq!(
            RejectReason::InvalidSession.close_code().reason,
            "invalid_session"
        );
    }

    #[test]
    fn eviction_reason_strings() {
        assert_eq!(EvictionReason::IdleTimeout.as_str(), "idle_timeout");
        assert_eq!(EvictionReason::HeartbeatFailed.as_str(), "heartbeat_failed");
        assert_eq!(EvictionReason::NoHeartbeat.as_str(), "no_heartbeat");
    }

    #[test]
    fn eviction_close_codes_are_distinct() {
        let codes = [
            EvictionReason::IdleTimeout.close_code().code,
            EvictionReason::HeartbeatFailed.close_code().code,
            EvictionReason::NoHeartbeat.close_code().code,
        ];
        assert_eq!(codes, [4008, 4009, 4010]);
    }

    #[test]
    fn client_initiated_close_has_no_code() {
        assert!(DisconnectReason::ClientClosed.close_code().is_none());
        assert!(DisconnectReason::WriteFailed.close_code().is_none());
        assert_eq!(DisconnectReason::RateLimited.close_code().unwrap().code, 4029);
        assert_eq!(DisconnectReason::ShuttingDown.close_code().unwrap().code, 1001);
        assert_eq!(DisconnectReason::ReplyPathLost.close_code().unwrap().code, 1011);
    }

    #[test]
    fn evicted_disconnect_uses_eviction_reason() {
        let reason = DisconnectReason::Evicted(EvictionReason::IdleTimeout);
        assert_eq!(reason.as_str(), "idle_timeout");
        assert_eq!(reason.close_code().unwrap().code, 4008);
    }

    #[test]
    fn event_serialization() {
        let event = GatewayEvent::Evicted {
            connection_id: ConnectionId::from("conn_1"),
            reason: EvictionReason::IdleTimeout,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "evicted");
        assert_eq!(value["reason"], "idle_timeout");
        assert_eq!(value["connection_id"], "conn_1");
        assert_eq!(event.connection_id().as_str(), "conn_1");
    }
}
