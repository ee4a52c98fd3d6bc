//! REST client module for the storefront account API.
//!
//! This module provides the `ApiClient` transport and the `ApiRequest`
//! description of a single call. Responses arrive wrapped in the
//! server's `{success, message, data}` envelope.
//!
//! Authentication is bearer-token based; the tokens themselves are
//! managed by `crate::auth`.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiRequest, Envelope, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
pub use error::ApiError;
