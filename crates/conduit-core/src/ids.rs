//! Branded ID newtypes for type safety.
//!
//! Connection and instance identifiers are distinct types wrapping a
//! `String`, so a connection ID can never be handed to an API that expects
//! an instance ID. Generated IDs are UUID v7 (time-ordered) with a short
//! type prefix, e.g. `conn_0192…`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix prepended to generated IDs.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id!(
    /// Globally unique identifier of one client connection.
    ConnectionId,
    "conn_"
);

branded_id!(
    /// Identifier of one running gateway process.
    InstanceId,
    "gw_"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"));
        assert!(Uuid::parse_str(&id[ConnectionId::PREFIX.len()..]).is_ok());
    }

    #[test]
    fn instance_id_has_prefix() {
        assert!(InstanceId::new().starts_with("gw_"));
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| ConnectionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ConnectionId::from("conn_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conn_abc\"");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_inner() {
        let id = InstanceId::from("gw_1".to_string());
        assert_eq!(id.to_string(), "gw_1");
        assert_eq!(String::from(id), "gw_1");
    }
}
