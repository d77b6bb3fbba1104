//! Public API client for the garment measurement service.
//!
//! This module provides the `ApiClient` facade, which logs in with a
//! client id/secret plus a user account and uploads garment images for
//! measurement. Requests carry a bearer token obtained from the login
//! endpoint; expiry and 401 responses are handled transparently.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, TransportError, TransportErrorKind};
