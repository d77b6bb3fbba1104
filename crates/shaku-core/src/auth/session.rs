use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::auth::credentials::{CredentialStore, UserLogin};
use crate::config::ClientConfig;
use crate::models::LoginResponse;
use crate::transport::{RequestBody, TransportClient};

/// Short-lived bearer token issued by the login endpoint.
#[derive(Clone)]
pub struct SessionToken {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    header: HeaderValue,
}

impl SessionToken {
    /// Returns `None` unless `expires_at > issued_at` and the token is
    /// usable in an `Authorization` header.
    pub fn new(token: String, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Option<Self> {
        if expires_at <= issued_at {
            return None;
        }
        let mut header = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
        header.set_sensitive(true);
        Some(Self {
            token,
            issued_at,
            expires_at,
            header,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Expired, or within `skew` of expiring. The skew never exceeds half
    /// the token lifetime so short-lived tokens stay usable.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let half_life = (self.expires_at - self.issued_at) / 2;
        now >= self.expires_at - skew.min(half_life)
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Expired,
}

/// Authorization header for one request, tagged with the token generation
/// it came from so a later 401 can invalidate exactly that token.
#[derive(Debug, Clone)]
pub struct AuthHeader {
    pub value: HeaderValue,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct TokenState {
    token: Option<SessionToken>,
    generation: u64,
    invalidated: bool,
    /// Bumped each time a refresh finishes, whatever its outcome.
    refresh_epoch: u64,
    last_failure: Option<ApiError>,
}

impl TokenState {
    fn usable(&self, now: DateTime<Utc>, skew: Duration) -> Option<AuthHeader> {
        let token = self.token.as_ref()?;
        if self.invalidated || token.needs_refresh_at(now, skew) {
            return None;
        }
        Some(AuthHeader {
            value: token.header.clone(),
            generation: self.generation,
        })
    }

    /// Install a token requested while the state was at generation `base`.
    /// A logout in the meantime wins and the token is dropped.
    fn install(&mut self, base: u64, token: SessionToken) -> Result<AuthHeader, ApiError> {
        if self.generation != base {
            debug!(base, current = self.generation, "Discarding token issued across a logout");
            return Err(ApiError::ReauthRequired);
        }
        self.generation += 1;
        self.invalidated = false;
        let header = AuthHeader {
            value: token.header.clone(),
            generation: self.generation,
        };
        self.token = Some(token);
        Ok(header)
    }
}

/// Owns the session token and keeps it valid.
///
/// The token lives behind a `std::sync::Mutex` that is only held while
/// reading or swapping it. Logins and refreshes are serialized by an async
/// gate; a caller that waited on the gate re-checks the generation first and
/// reuses a token minted while it was waiting, so N concurrent callers with
/// an expired token cause exactly one refresh. A refresh that fails is
/// shared the same way: waiters get its error instead of trying again.
pub struct AuthSession {
    transport: TransportClient,
    credentials: Arc<CredentialStore>,
    login_path: String,
    refresh_skew: Duration,
    remember_login: bool,
    state: Mutex<TokenState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(
        transport: TransportClient,
        credentials: Arc<CredentialStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            login_path: config.login_path.clone(),
            refresh_skew: Duration::try_seconds(config.token_refresh_skew_secs.max(0))
                .unwrap_or_else(Duration::zero),
            remember_login: config.remember_login,
            state: Mutex::new(TokenState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AuthState {
        let state = self.lock_state();
        match state.token {
            None => AuthState::Unauthenticated,
            Some(_) if state.usable(Utc::now(), self.refresh_skew).is_some() => {
                AuthState::Authenticated
            }
            Some(_) => AuthState::Expired,
        }
    }

    /// Snapshot of the current token, if any.
    pub fn token(&self) -> Option<SessionToken> {
        self.lock_state().token.clone()
    }

    /// Log in with the user's account and replace the current token.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput(
                "username and password required".to_string(),
            ));
        }

        let login = UserLogin::new(username, password);
        let _gate = self.refresh_gate.lock().await;
        let base = self.lock_state().generation;
        let token = self.request_token(&login).await?;
        let expires_at = token.expires_at;
        self.lock_state().install(base, token)?;

        if self.remember_login {
            self.credentials.remember_login(login);
        } else {
            self.credentials.forget_login();
        }
        info!(username = %username, expires_at = %expires_at, "Login successful");
        Ok(())
    }

    /// Drop the token and the cached login.
    pub fn logout(&self) {
        let mut state = self.lock_state();
        state.token = None;
        state.invalidated = false;
        state.last_failure = None;
        state.generation += 1;
        drop(state);
        self.credentials.forget_login();
        info!("Logged out");
    }

    /// Header for the next request, silently re-logging in first if the
    /// token has expired or was rejected.
    pub async fn authorize(&self) -> Result<AuthHeader, ApiError> {
        let seen_epoch = {
            let state = self.lock_state();
            if let Some(header) = state.usable(Utc::now(), self.refresh_skew) {
                return Ok(header);
            }
            state.refresh_epoch
        };
        self.refresh(seen_epoch).await
    }

    async fn refresh(&self, seen_epoch: u64) -> Result<AuthHeader, ApiError> {
        let _gate = self.refresh_gate.lock().await;

        let base = {
            let state = self.lock_state();
            if let Some(header) = state.usable(Utc::now(), self.refresh_skew) {
                debug!(generation = header.generation, "Reusing token refreshed by another caller");
                return Ok(header);
            }
            if state.refresh_epoch != seen_epoch {
                if let Some(failure) = &state.last_failure {
                    debug!(error = %failure, "Sharing result of the refresh that just failed");
                    return Err(failure.replicate());
                }
            }
            state.generation
        };

        let login = self.credentials.cached_login().ok_or(ApiError::ReauthRequired)?;
        debug!(username = %login.username, "Refreshing session token");
        let outcome = self.request_token(&login).await;

        let mut state = self.lock_state();
        state.refresh_epoch += 1;
        let result = outcome.and_then(|token| state.install(base, token));
        state.last_failure = result.as_ref().err().map(ApiError::replicate);
        result
    }

    /// Mark the token from `generation` as rejected. A 401 for an older
    /// token is ignored so it cannot discard a fresher one.
    pub fn invalidate(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation == generation && state.token.is_some() {
            warn!(generation, "Session token rejected, will re-authenticate");
            state.invalidated = true;
        } else {
            debug!(generation, current = state.generation, "Ignoring stale token rejection");
        }
    }

    async fn request_token(&self, login: &UserLogin) -> Result<SessionToken, ApiError> {
        let credentials = self.credentials.get()?;
        let body = RequestBody::Json(json!({
            "client_id": credentials.client_id(),
            "client_secret": credentials.client_secret(),
            "username": login.username,
            "password": login.password(),
        }));
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self
            .transport
            .send(Method::POST, &self.login_path, headers, &body)
            .await?;

        if !response.is_success() {
            let message = ApiError::truncate_body(&response.text());
            return Err(if (400..500).contains(&response.status) {
                ApiError::Authentication {
                    status: response.status,
                    endpoint: self.login_path.clone(),
                    message,
                }
            } else {
                ApiError::Rejected {
                    status: response.status,
                    endpoint: self.login_path.clone(),
                    message,
                }
            });
        }

        let decoded = LoginResponse::decode(&self.login_path, &response.body)?;
        let issued_at = Utc::now();
        let expires_at = Duration::try_seconds(decoded.expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| ApiError::malformed(&self.login_path, "expires_in out of range"))?;

        SessionToken::new(decoded.token, issued_at, expires_at).ok_or_else(|| {
            ApiError::malformed(&self.login_path, "token is not a valid header value")
        })
    }

    #[cfg(test)]
    pub(crate) fn expire_now(&self) {
        let mut state = self.lock_state();
        if let Some(token) = state.token.as_mut() {
            token.issued_at = Utc::now() - Duration::hours(2);
            token.expires_at = Utc::now() - Duration::hours(1);
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("login_path", &self.login_path)
            .field("state", &self.state())
            .finish()
    }
}
