//! Session validator backed by an HTTP session authority.
//!
//! Request: `POST {url}` with `{"token": "..."}`.
//! Response: `{"valid": bool, "identity": {"user_id": ..., ...}}`.
//! `401`/`403` are treated as an explicit rejection; other non-2xx statuses
//! are errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};

use crate::errors::ValidatorError;
use crate::validator::{SessionValidator, Validation};

const MAX_ERROR_BODY: usize = 256;

/// Validates tokens against a remote HTTP endpoint.
pub struct HttpSessionValidator {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionValidator {
    /// Create a validator posting to `url`, with `timeout` as the per-request
    /// deadline.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ValidatorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Endpoint this validator posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionValidator for HttpSessionValidator {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn validate(&self, token: &str) -> Result<Validation, ValidatorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "session authority rejected token");
            return Ok(Validation::invalid());
        }
        if !status.is_success() {
            let mut message = resp.text().await.unwrap_or_default();
            message.truncate(MAX_ERROR_BODY);
            return Err(ValidatorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json::<Validation>().await?)
    }

    async fn health_check(&self) -> bool {
        // Any HTTP answer means the authority is up; only transport errors count.
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "token": "" }))
            .send()
            .await
            .is_ok()
    }
}
