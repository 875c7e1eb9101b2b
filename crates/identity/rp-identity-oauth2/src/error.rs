//! Flow error taxonomy.

use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// The state token is unknown or was already consumed. CSRF failures
    /// are fatal to the flow and never retried.
    #[error("state token not found or already used")]
    InvalidState,

    #[error("state token expired")]
    ExpiredState,

    #[error("provider not registered: {0}")]
    ProviderNotFound(String),

    #[error("signing key fetch failed: {0}")]
    KeyFetch(String),

    /// A network call exceeded the configured timeout. Retryable by the
    /// caller; the engine itself never retries.
    #[error("network timeout calling {0}")]
    NetworkTimeout(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("userinfo request failed: {0}")]
    UserInfo(String),

    #[error("id token validation failed: {0}")]
    TokenValidation(#[from] ValidationFailure),

    #[error("provider response carries no stable subject identifier")]
    MissingSubject,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("http request failed: {0}")]
    Http(reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rp_identity_core::StorageError),
}

impl FlowError {
    /// Classifies a transport error, keeping timeouts distinct so callers
    /// can treat them as retryable.
    pub(crate) fn from_transport(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_timeout() {
            FlowError::NetworkTimeout(endpoint.to_string())
        } else {
            FlowError::Http(err)
        }
    }
}

/// Reason an ID token was rejected. Carried inside
/// [`FlowError::TokenValidation`] so the specific failing claim is
/// loggable. An unknown key id is deliberately distinct from a signature
/// mismatch on a known key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("token is not a valid JWT: {0}")]
    Malformed(String),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no signing key matches kid {0:?}")]
    UnknownKeyId(Option<String>),

    #[error("signature verification failed")]
    BadSignature,

    #[error("issuer {0} is not an expected issuer")]
    IssuerMismatch(String),

    #[error("audience {0} does not match the client id")]
    AudienceMismatch(String),

    #[error("token expired at {0}")]
    Expired(i64),

    #[error("token issued in the future (iat {0})")]
    IssuedInFuture(i64),

    #[error("nonce does not match the expected value")]
    NonceMismatch,

    #[error("subject claim missing or empty")]
    MissingSubject,

    #[error("required claim missing: {0}")]
    MissingClaim(&'static str),
}
