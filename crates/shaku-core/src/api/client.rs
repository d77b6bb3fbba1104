//! API client for the garment measurement service.
//!
//! `ApiClient` composes the auth session and the transport. It is cheap to
//! clone and safe to share between tasks; all clones use the same session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthSession, AuthState, CredentialStore, Credentials};
use crate::config::ClientConfig;
use crate::models::{ImageSource, MeasurementRequest, MeasurementResult};
use crate::transport::{MultipartFile, RequestBody, TransportClient};

use super::error::{TransportError, TransportErrorKind};
use super::ApiError;

struct Inner {
    config: ClientConfig,
    transport: TransportClient,
    credentials: Arc<CredentialStore>,
    session: AuthSession,
}

/// Client for the measurement API.
/// Clone is cheap - all clones share one session and connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// Create a client for the default service endpoint
    pub fn new(client_id: &str, client_secret: &str) -> Result<Self, ApiError> {
        Self::with_config(Credentials::new(client_id, client_secret), ClientConfig::default())
    }

    pub fn with_config(credentials: Credentials, config: ClientConfig) -> Result<Self, ApiError> {
        Self::build(CredentialStore::with_credentials(credentials), config)
    }

    /// Create a client whose credentials are supplied later with
    /// [`ApiClient::set_credentials`]. Logging in before then fails with
    /// `NotConfigured`.
    pub fn unconfigured(config: ClientConfig) -> Result<Self, ApiError> {
        Self::build(CredentialStore::new(), config)
    }

    fn build(store: CredentialStore, config: ClientConfig) -> Result<Self, ApiError> {
        let transport = TransportClient::new(&config)?;
        let credentials = Arc::new(store);
        let session = AuthSession::new(transport.clone(), Arc::clone(&credentials), &config);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                credentials,
                session,
            }),
        })
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.inner.credentials.set(credentials);
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.session.state()
    }

    /// Log in with a user account. The login is remembered (in memory only)
    /// so expired tokens are renewed without another call to `login`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        self.inner.session.login(username, password).await
    }

    pub fn logout(&self) {
        self.inner.session.logout();
    }

    /// Upload a garment image and return its measurements.
    ///
    /// The image is validated before any network I/O. A 401 from the
    /// service invalidates the token and the upload is retried once after
    /// re-authenticating.
    #[instrument(skip(self, image))]
    pub async fn garment_measurement(
        &self,
        image: impl Into<ImageSource>,
    ) -> Result<MeasurementResult, ApiError> {
        let config = &self.inner.config;
        let request = MeasurementRequest::from_source(image.into(), config.max_image_bytes).await?;
        debug!(
            file_name = %request.file_name,
            content_type = %request.content_type,
            bytes = request.image_bytes.len(),
            "Image validated"
        );

        let body = RequestBody::Multipart(MultipartFile {
            field: config.upload_field.clone(),
            file_name: request.file_name,
            content_type: request.content_type,
            data: request.image_bytes,
        });
        let endpoint = config.measurement_path.as_str();
        let mut reauthenticated = false;

        loop {
            let auth = self.inner.session.authorize().await?;
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, auth.value);
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

            let response = self
                .inner
                .transport
                .send(Method::POST, endpoint, headers, &body)
                .await?;

            if response.status == 401 && !reauthenticated {
                warn!(endpoint, "Token rejected, re-authenticating once");
                self.inner.session.invalidate(auth.generation);
                reauthenticated = true;
                continue;
            }

            if !response.is_success() {
                return Err(ApiError::from_status(response.status, endpoint, &response.text()));
            }

            let result = MeasurementResult::decode(endpoint, &response.body)?;
            info!(
                parts = result.measurements.len(),
                confidence = ?result.confidence,
                "Garment measurement received"
            );
            return Ok(result);
        }
    }

    /// Like [`ApiClient::garment_measurement`], but gives up once `deadline`
    /// has passed, cancelling any in-flight request or retry backoff.
    pub async fn garment_measurement_within(
        &self,
        image: impl Into<ImageSource>,
        deadline: Duration,
    ) -> Result<MeasurementResult, ApiError> {
        let image = image.into();
        match tokio::time::timeout(deadline, self.garment_measurement(image)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Measurement deadline exceeded");
                Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    &self.inner.config.measurement_path,
                    format!("deadline of {}ms exceeded", deadline.as_millis()),
                )
                .into())
            }
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("credentials", &self.inner.credentials)
            .field("session", &self.inner.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN: &str = "/auth/login";
    const MEASURE: &str = "/garment/measurement";

    fn jpeg() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend_from_slice(b"\x00\x10JFIF\x00shirt-pixels");
        data
    }

    fn client_for(server: &MockServer) -> ApiClient {
        let config = ClientConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..ClientConfig::with_base_url(&server.uri())
        };
        ApiClient::with_config(Credentials::new("cid", "csecret"), config).unwrap()
    }

    fn measurement_body() -> serde_json::Value {
        json!({
            "measurements": {"chest": 54.0, "body_length": 72.5, "sleeve_length": 63.1},
            "confidence": 0.91,
            "request_id": "r-123"
        })
    }

    async fn mount_login(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path(LOGIN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": token, "expires_in": 3600})),
            )
            .mount(server)
            .await;
    }

    async fn count(server: &MockServer, route: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }

    #[test]
    fn test_client_is_shareable() {
        fn assert_send_sync<T: Send + Sync + Clone + 'static>() {}
        assert_send_sync::<ApiClient>();
    }

    #[tokio::test]
    async fn test_login_then_measure() {
        let server = MockServer::start().await;
        mount_login(&server, "tok-1").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        assert_eq!(client.auth_state(), AuthState::Authenticated);

        let result = client.garment_measurement(jpeg()).await.unwrap();
        assert!(!result.measurements.is_empty());
        assert_eq!(result.get("chest"), Some(54.0));
        assert_eq!(result.confidence, Some(0.91));
        assert_eq!(result.raw_response["request_id"], "r-123");
    }

    #[tokio::test]
    async fn test_measure_from_file_path() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("garment_image.jpg");
        std::fs::write(&image_path, jpeg()).unwrap();

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        client.garment_measurement(image_path.as_path()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let upload = requests.iter().find(|r| r.url.path() == MEASURE).unwrap();
        let sent = String::from_utf8_lossy(&upload.body);
        assert!(sent.contains(r#"name="image""#));
        assert!(sent.contains(r#"filename="garment_image.jpg""#));
        assert!(sent.contains("image/jpeg"));
    }

    #[tokio::test]
    async fn test_empty_image_makes_no_network_call() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let err = client.garment_measurement(Vec::<u8>::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_image_is_invalid_input() {
        let server = MockServer::start().await;
        let config = ClientConfig {
            max_image_bytes: 8,
            ..ClientConfig::with_base_url(&server.uri())
        };
        let client = ApiClient::with_config(Credentials::new("cid", "csecret"), config).unwrap();

        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_measure_before_login_requires_reauth() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        assert!(matches!(err, ApiError::ReauthRequired));
        assert_eq!(count(&server, MEASURE).await, 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_malformed_response() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"measurements\": {"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        match err {
            ApiError::MalformedResponse { endpoint, .. } => assert_eq!(endpoint, MEASURE),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_three_503_then_success() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let result = client.garment_measurement(jpeg()).await.unwrap();
        assert_eq!(result.measurements.len(), 3);
        assert_eq!(count(&server, MEASURE).await, 4);
    }

    #[tokio::test]
    async fn test_four_503_surfaces_server_error() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        match err {
            ApiError::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::ServerError);
                assert_eq!(e.status_code, Some(503));
                assert_eq!(e.endpoint, MEASURE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(count(&server, MEASURE).await, 4);
    }

    #[tokio::test]
    async fn test_client_error_is_rejected_without_retry() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(422).set_body_string("no garment detected"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        match err {
            ApiError::Rejected { status, message, .. } => {
                assert_eq!(status, 422);
                assert_eq!(message, "no garment detected");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_401_triggers_one_silent_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "old", "expires_in": 3600})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_login(&server, "new").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .and(header("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let result = client.garment_measurement(jpeg()).await.unwrap();

        assert!(!result.measurements.is_empty());
        assert_eq!(count(&server, LOGIN).await, 2);
        assert_eq!(count(&server, MEASURE).await, 2);
    }

    #[tokio::test]
    async fn test_repeated_401_surfaces_authentication_error() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(401).set_body_string("account disabled"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication { status: 401, .. }));
        assert_eq!(count(&server, MEASURE).await, 2);
        assert_eq!(count(&server, LOGIN).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"token": "tok", "expires_in": 3600}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(ResponseTemplate::new(200).set_body_json(measurement_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        client.inner.session.expire_now();
        assert_eq!(client.auth_state(), AuthState::Expired);

        let calls = (0..10).map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.garment_measurement(jpeg()).await })
        });
        for outcome in join_all(calls).await {
            let result = outcome.unwrap().unwrap();
            assert!(!result.measurements.is_empty());
        }

        // One initial login plus exactly one refresh
        assert_eq!(count(&server, LOGIN).await, 2);
        assert_eq!(count(&server, MEASURE).await, 10);
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_call() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        Mock::given(method("POST"))
            .and(path(MEASURE))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(measurement_body())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        let err = client
            .garment_measurement_within(jpeg(), Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            ApiError::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::Timeout);
                assert_eq!(e.endpoint, MEASURE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;
        let client = ApiClient::unconfigured(ClientConfig::with_base_url(&server.uri())).unwrap();

        let err = client.login("alice", "pw").await.unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
        assert_eq!(count(&server, LOGIN).await, 0);

        client.set_credentials(Credentials::new("cid", "csecret"));
        client.login("alice", "pw").await.unwrap();
        assert_eq!(client.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_then_measure_requires_reauth() {
        let server = MockServer::start().await;
        mount_login(&server, "tok").await;

        let client = client_for(&server);
        client.login("alice", "pw").await.unwrap();
        client.logout();

        assert_eq!(client.auth_state(), AuthState::Unauthenticated);
        let err = client.garment_measurement(jpeg()).await.unwrap_err();
        assert!(matches!(err, ApiError::ReauthRequired));
    }

    #[test]
    fn test_debug_hides_secret() {
        let client = ApiClient::new("public-id", "very-secret").unwrap();
        let text = format!("{client:?}");
        assert!(text.contains("ApiClient"));
        assert!(!text.contains("very-secret"));
    }
}
