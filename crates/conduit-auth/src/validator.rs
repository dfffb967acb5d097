//! The session validator seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::Identity;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ValidatorError;

/// Outcome of validating a session token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the token is currently valid.
    pub valid: bool,
    /// Claims for a valid token.
    #[serde(default)]
    pub identity: Option<Identity>,
}

impl Validation {
    /// A valid token carrying `identity`.
    pub fn valid(identity: Identity) -> Self {
        Self {
            valid: true,
            identity: Some(identity),
        }
    }

    /// An invalid token.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// The identity, if the token is valid and carries one.
    pub fn into_identity(self) -> Option<Identity> {
        if self.valid { self.identity } else { None }
    }
}

/// External authority that verifies opaque session tokens.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Verify `token`. `Ok` with `valid = false` means the authority
    /// rejected it; `Err` means the authority could not be asked.
    async fn validate(&self, token: &str) -> Result<Validation, ValidatorError>;

    /// Whether the authority is reachable.
    async fn health_check(&self) -> bool;
}

/// Validate with a deadline, collapsing every failure to "invalid".
///
/// Returns the identity for an accepted token. Timeouts and transport
/// errors are logged and treated as rejection.
pub async fn validate_with_timeout(
    validator: &Arc<dyn SessionValidator>,
    token: &str,
    timeout: Duration,
) -> Option<Identity> {
    if token.is_empty() {
        return None;
    }
    match tokio::time::timeout(timeout, validator.validate(token)).await {
        Ok(Ok(validation)) => validation.into_identity(),
        Ok(Err(e)) => {
            warn!(error = %e, "session validation failed");
            None
        }
        Err(_) => {
            warn!(error = %ValidatorError::Timeout(timeout), "session validation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowValidator;

    #[async_trait]
    impl SessionValidator for SlowValidator {
        async fn validate(&self, _token: &str) -> Result<Validation, ValidatorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Validation::valid(Identity::user("late")))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    struct FailingValidator;

    #[async_trait]
    impl SessionValidator for FailingValidator {
        async fn validate(&self, _token: &str) -> Result<Validation, ValidatorError> {
            Err(ValidatorError::Status {
                status: 500,
                message: "boom".into(),
            })
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl SessionValidator for AcceptAll {
        async fn validate(&self, token: &str) -> Result<Validation, ValidatorError> {
            Ok(Validation::valid(Identity::user(token)))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_invalid() {
        let validator: Arc<dyn SessionValidator> = Arc::new(SlowValidator);
        let result = validate_with_timeout(&validator, "tok", Duration::from_millis(100)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn error_is_invalid() {
        let validator: Arc<dyn SessionValidator> = Arc::new(FailingValidator);
        let result = validate_with_timeout(&validator, "tok", Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn empty_token_never_reaches_validator() {
        let validator: Arc<dyn SessionValidator> = Arc::new(AcceptAll);
        assert!(validate_with_timeout(&validator, "", Duration::from_secs(1)).await.is_none());
        let identity = validate_with_timeout(&validator, "bob", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "bob");
    }

    #[test]
    fn valid_without_identity_yields_none() {
        let validation = Validation {
            valid: true,
            identity: None,
        };
        assert!(validation.into_identity().is_none());
    }

    #[test]
    fn invalid_with_identity_yields_none() {
        let validation = Validation {
            valid: false,
            identity: Some(Identity::user("x")),
        };
        assert!(validation.into_identity().is_none());
    }
}
