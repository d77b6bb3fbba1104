use thiserror::Error;

/// Which transient fault exhausted the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionFailed,
    ServerError,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::ConnectionFailed => write!(f, "connection failed"),
            TransportErrorKind::ServerError => write!(f, "server error"),
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind} on {endpoint}{}: {message}", status_suffix(.status_code))]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status_code: Option<u16>,
    pub endpoint: String,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, endpoint: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed at {endpoint} (status {status}): {message}")]
    Authentication {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("Session expired and no cached login is available - call login again")]
    ReauthRequired,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("Client not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Request rejected by {endpoint} (status {status}): {message}")]
    Rejected {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Classify a non-success response from a data endpoint.
    pub fn from_status(status: u16, endpoint: &str, body: &str) -> Self {
        let message = Self::truncate_body(body);
        match status {
            401 => ApiError::Authentication {
                status,
                endpoint: endpoint.to_string(),
                message,
            },
            500..=599 => ApiError::Transport(
                TransportError::new(TransportErrorKind::ServerError, endpoint, message)
                    .with_status(status),
            ),
            _ => ApiError::Rejected {
                status,
                endpoint: endpoint.to_string(),
                message,
            },
        }
    }

    pub fn malformed(endpoint: &str, message: impl Into<String>) -> Self {
        ApiError::MalformedResponse {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// The HTTP status that caused this error, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Authentication { status, .. } | ApiError::Rejected { status, .. } => {
                Some(*status)
            }
            ApiError::Transport(e) => e.status_code,
            _ => None,
        }
    }

    /// Whether a caller could reasonably try the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// Copy of this error handed to every caller that waited on the same
    /// failed token refresh.
    pub(crate) fn replicate(&self) -> ApiError {
        match self {
            ApiError::Authentication {
                status,
                endpoint,
                message,
            } => ApiError::Authentication {
                status: *status,
                endpoint: endpoint.clone(),
                message: message.clone(),
            },
            ApiError::ReauthRequired => ApiError::ReauthRequired,
            ApiError::Transport(e) => ApiError::Transport(e.clone()),
            ApiError::InvalidInput(message) => ApiError::InvalidInput(message.clone()),
            ApiError::MalformedResponse { endpoint, message } => ApiError::MalformedResponse {
                endpoint: endpoint.clone(),
                message: message.clone(),
            },
            ApiError::NotConfigured(what) => ApiError::NotConfigured(what),
            ApiError::Rejected {
                status,
                endpoint,
                message,
            } => ApiError::Rejected {
                status: *status,
                endpoint: endpoint.clone(),
                message: message.clone(),
            },
            ApiError::Client(e) => {
                let endpoint = e.url().map(|u| u.path().to_string()).unwrap_or_default();
                ApiError::Transport(TransportError::new(
                    TransportErrorKind::ConnectionFailed,
                    &endpoint,
                    e.to_string(),
                ))
            }
        }
    }
}
