//! Fixed token table, for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use conduit_core::Identity;

use crate::errors::ValidatorError;
use crate::validator::{SessionValidator, Validation};

/// Accepts exactly the tokens it was built with.
#[derive(Debug, Default, Clone)]
pub struct StaticSessionValidator {
    tokens: HashMap<String, Identity>,
}

impl StaticSessionValidator {
    /// Build from a token → identity table.
    pub fn new(tokens: impl IntoIterator<Item = (String, Identity)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Add one token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        let _ = self.tokens.insert(token.into(), identity);
        self
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl SessionValidator for StaticSessionValidator {
    async fn validate(&self, token: &str) -> Result<Validation, ValidatorError> {
        Ok(self
            .tokens
            .get(token)
            .cloned()
            .map_or_else(Validation::invalid, Validation::valid))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
