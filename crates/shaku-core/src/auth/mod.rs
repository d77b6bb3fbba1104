//! Authentication module for managing client credentials and user sessions.
//!
//! This module provides:
//! - `CredentialStore`: in-memory client credentials and cached user login
//! - `AuthSession`: token lifecycle with silent, single-flight re-login
//!
//! Tokens are replaced wholesale on refresh and never persisted.

pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, Credentials, UserLogin};
pub use session::{AuthHeader, AuthSession, AuthState, SessionToken};
