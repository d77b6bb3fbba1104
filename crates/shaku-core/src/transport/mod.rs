//! Network transport for the measurement API.
//!
//! `TransportClient` executes one logical request with a fixed connect and
//! request timeout, retrying connection failures, timeouts and 5xx
//! responses with exponential backoff. Status classification beyond that
//! (401 handling, decoding) belongs to the layers above.

pub mod client;

pub use client::{MultipartFile, RawResponse, RequestBody, RetryPolicy, TransportClient};
