use std::fmt;
use std::sync::RwLock;

use crate::api::ApiError;

/// Client application credentials issued by the API provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Username/password kept for silent re-login after token expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct UserLogin {
    pub username: String,
    password: String,
}

impl UserLogin {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for UserLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserLogin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// In-memory holder for client credentials and the cached user login.
///
/// Shared by every clone of an `ApiClient`; nothing here is ever written to
/// disk or logged.
#[derive(Default)]
pub struct CredentialStore {
    credentials: RwLock<Option<Credentials>>,
    login: RwLock<Option<UserLogin>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        let store = Self::new();
        store.set(credentials);
        store
    }

    pub fn set(&self, credentials: Credentials) {
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials);
    }

    pub fn get(&self) -> Result<Credentials, ApiError> {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ApiError::NotConfigured("client_id and client_secret must be set"))
    }

    pub fn is_configured(&self) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn remember_login(&self, login: UserLogin) {
        *self.login.write().unwrap_or_else(|e| e.into_inner()) = Some(login);
    }

    pub fn cached_login(&self) -> Option<UserLogin> {
        self.login.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn forget_login(&self) {
        *self.login.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("configured", &self.is_configured())
            .field("has_cached_login", &self.cached_login().is_some())
            .finish()
    }
}
