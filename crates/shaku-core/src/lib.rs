//! Core library for the shaku garment measurement API.
//!
//! Provides an authenticated client that logs in with client credentials
//! and a user account, then uploads garment images for measurement:
//!
//! ```rust,ignore
//! let client = shaku_core::ApiClient::new("CLIENT_ID", "CLIENT_SECRET")?;
//! client.login("USERNAME", "PASSWORD").await?;
//! let result = client.garment_measurement("garment_image.jpg").await?;
//! println!("{:?}", result.measurements);
//! ```
//!
//! Token expiry and 401 responses are handled inside the client; callers
//! never refresh tokens themselves.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod transport;

pub use api::{ApiClient, ApiError, TransportError, TransportErrorKind};
pub use auth::{AuthState, Credentials};
pub use config::ClientConfig;
pub use models::{ImageSource, MeasurementResult};
