//! WebSocket connection handling: per-connection state, the instance's
//! connection map, heartbeat liveness, rate limiting, and the socket session.

pub mod connection;
pub mod heartbeat;
pub mod local_map;
pub mod rate_limit;
pub mod session;

pub use connection::{Connection, ConnectionState, OutboundFrame};
pub use heartbeat::{HeartbeatResult, run_heartbeat};
pub use local_map::LocalConnectionMap;
pub use rate_limit::RateLimiter;
pub use session::{reject, run_ws_session};
