//! Validator error types.

use std::time::Duration;

/// Errors raised while talking to a session authority.
///
/// The gateway never surfaces these to clients: any error during the
/// handshake is reported as an invalid session.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The authority answered with an unexpected status.
    #[error("session authority returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// The authority did not answer within the deadline.
    #[error("session validation timed out after {0:?}")]
    Timeout(Duration),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let err = ValidatorError::Status {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "session authority returned 502: bad gateway");
    }

    #[test]
    fn timeout_display() {
        let err = ValidatorError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }
}
