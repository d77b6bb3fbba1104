//! HTTP executor with timeout and bounded retry.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::error::{TransportError, TransportErrorKind};
use crate::api::ApiError;
use crate::config::ClientConfig;

/// One file field of a multipart upload. `Bytes` makes the per-attempt
/// rebuild of the form a reference-count bump, not a copy.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartFile),
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Low-level request executor shared by the auth session and the API facade.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

enum Attempt {
    Done(RawResponse),
    Retry(TransportError),
}

impl TransportClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::from_config(config),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying connection failures, timeouts and 5xx
    /// responses. Any other response, including 4xx, is returned as-is.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: &RequestBody,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url(path);
        let mut retries = 0;

        loop {
            debug!(method = %method, url = %url, attempt = retries + 1, "Sending request");

            let failure = match self.attempt(&method, &url, path, &headers, body).await? {
                Attempt::Done(response) => {
                    debug!(url = %url, status = response.status, "Response received");
                    return Ok(response);
                }
                Attempt::Retry(failure) => failure,
            };

            retries += 1;
            if retries > self.policy.max_retries {
                warn!(url = %url, error = %failure, "Retry budget exhausted");
                return Err(failure);
            }

            let backoff = self.policy.backoff(retries);
            warn!(
                url = %url,
                retry = retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Transient failure, backing off"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        path: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> Result<Attempt, TransportError> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone());

        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Multipart(file) => {
                let part = Part::stream_with_length(file.data.clone(), file.data.len() as u64)
                    .file_name(file.file_name.clone())
                    .mime_str(&file.content_type)
                    .map_err(|e| {
                        TransportError::new(
                            TransportErrorKind::ConnectionFailed,
                            path,
                            format!("invalid content type {}: {e}", file.content_type),
                        )
                    })?;
                request.multipart(Form::new().part(file.field.clone(), part))
            }
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify(e, path).map(Attempt::Retry),
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return classify(e, path).map(Attempt::Retry),
        };

        if (500..600).contains(&status) {
            let message = ApiError::truncate_body(&String::from_utf8_lossy(&body));
            return Ok(Attempt::Retry(
                TransportError::new(TransportErrorKind::ServerError, path, message).with_status(status),
            ));
        }

        Ok(Attempt::Done(RawResponse {
            status,
            headers,
            body,
        }))
    }
}

/// Map a reqwest failure to a retryable transport error, or fail fast when
/// the request itself could never succeed.
fn classify(e: reqwest::Error, path: &str) -> Result<TransportError, TransportError> {
    if e.is_builder() {
        return Err(TransportError::new(
            TransportErrorKind::ConnectionFailed,
            path,
            format!("invalid request: {e}"),
        ));
    }
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::ConnectionFailed
    };
    Ok(TransportError::new(kind, path, e.to_string()))
}
