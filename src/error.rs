/// Error types for pinauth operations
use thiserror::Error;

/// Failure of the underlying HTTP transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response is not valid JSON: {0}")]
    Decode(String),

    #[error("HTTP request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Failure of the secure token store, distinct from "not found"
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("token storage unavailable: {0}")]
    Backend(String),

    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<keyring::Error> for StorageError {
    fn from(err: keyring::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Errors raised by the authorization code flow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("redirect URL carries no authorization code")]
    MissingCode,

    #[error("state parameter in redirect does not match the authorization request")]
    StateMismatch,

    #[error("authorization denied by provider: {error}, description: {description:?}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("token endpoint response has no access_token")]
    MalformedTokenResponse,

    #[error("operation not allowed in state {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by authenticated resource fetches
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("no access token stored for this account")]
    Unauthenticated,

    #[error("response contained no results")]
    EmptyResult,

    #[error("response is missing or has a malformed `{0}`")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors loading client configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid URL in {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
}

pub type Result<T, E = OAuthError> = std::result::Result<T, E>;
