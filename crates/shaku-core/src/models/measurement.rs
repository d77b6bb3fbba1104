use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiError;

/// Garment measurements decoded from the measurement endpoint.
///
/// `measurements` maps a body-part or garment dimension name (e.g.
/// `"chest"`, `"sleeve_length"`) to its numeric value. Fields the schema
/// does not know about are kept only in `raw_response`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub measurements: BTreeMap<String, f64>,
    pub confidence: Option<f64>,
    pub raw_response: Value,
}

#[derive(Debug, Deserialize)]
struct MeasurementPayload {
    measurements: BTreeMap<String, f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl MeasurementResult {
    /// Decode a measurement response body. All-or-nothing: any schema
    /// violation fails the whole decode.
    pub fn decode(endpoint: &str, raw: &[u8]) -> Result<Self, ApiError> {
        let raw_response = parse_object(endpoint, raw)?;

        let payload = MeasurementPayload::deserialize(&raw_response)
            .map_err(|e| ApiError::malformed(endpoint, format!("unexpected schema: {e}")))?;

        if payload.measurements.is_empty() {
            return Err(ApiError::malformed(endpoint, "measurements object is empty"));
        }

        Ok(Self {
            measurements: payload.measurements,
            confidence: payload.confidence,
            raw_response,
        })
    }

    pub fn get(&self, part: &str) -> Option<f64> {
        self.measurements.get(part).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.measurements.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Body of a successful login response
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    /// Token lifetime in whole seconds, rounded up
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    token: String,
    expires_in: f64,
}

impl LoginResponse {
    pub fn decode(endpoint: &str, raw: &[u8]) -> Result<Self, ApiError> {
        let value = parse_object(endpoint, raw)?;
        let payload = LoginPayload::deserialize(&value)
            .map_err(|e| ApiError::malformed(endpoint, format!("unexpected schema: {e}")))?;

        if payload.token.trim().is_empty() {
            return Err(ApiError::malformed(endpoint, "token is empty"));
        }
        let seconds = payload.expires_in.ceil();
        if !(seconds > 0.0 && seconds < i64::MAX as f64) {
            return Err(ApiError::malformed(
                endpoint,
                format!("expires_in must be a positive number of seconds, got {}", payload.expires_in),
            ));
        }
        Ok(Self {
            token: payload.token,
            expires_in: seconds as i64,
        })
    }
}

fn parse_object(endpoint: &str, raw: &[u8]) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| ApiError::malformed(endpoint, format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ApiError::malformed(endpoint, "expected a JSON object"));
    }
    Ok(value)
}
