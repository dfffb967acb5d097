//! Identity claims returned by the session authority.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User and tenant claims attached to an authenticated connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier.
    pub user_id: String,
    /// Tenant the user belongs to, when multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Any further claims, passed through untouched.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl Identity {
    /// Identity with only a user ID.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Set the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}
