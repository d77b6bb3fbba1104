//! Data models for the measurement API.
//!
//! - `MeasurementResult`, `LoginResponse`: typed decoding of JSON responses
//! - `ImageSource`, `MeasurementRequest`: validated image uploads

pub mod image;
pub mod measurement;

pub use image::{ImageFormat, ImageSource, MeasurementRequest};
pub use measurement::{LoginResponse, MeasurementResult};
