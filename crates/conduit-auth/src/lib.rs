//! # conduit-auth
//!
//! Session token validation.
//!
//! - [`SessionValidator`]: the async seam the gateway calls during handshake
//! - [`HttpSessionValidator`]: posts tokens to an external session authority
//! - [`StaticSessionValidator`]: fixed token table for development and tests
//! - [`validate_with_timeout`]: bounded-latency wrapper; a timeout is a rejection

#![deny(unsafe_code)]

pub mod errors;
pub mod http;
pub mod static_tokens;
pub mod validator;

pub use errors::ValidatorError;
pub use http::HttpSessionValidator;
pub use static_tokens::StaticSessionValidator;
pub use validator::{SessionValidator, Validation, validate_with_timeout};
