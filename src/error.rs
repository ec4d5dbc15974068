/// Unified error types for the Concrnt client
use thiserror::Error;

/// Main error type for client operations
///
/// Every variant carries owned data so the type is `Clone`; a single
/// in-flight request failure can be handed to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The target host is in its offline back-off window, or the request
    /// failed at the connection level
    #[error("domain {0} is offline")]
    DomainOffline(String),

    /// Resource does not exist (404), possibly served from the negative cache
    #[error("not found: {0}")]
    NotFound(String),

    /// Server refused the request (403)
    #[error("permission denied: {0}")]
    Permission(String),

    /// Any other non-2xx response
    #[error("transport error (status {status}): {body}")]
    Transport { status: u16, body: String },

    /// 2xx response whose envelope reported an error
    #[error("application error: {0}")]
    Application(String),

    /// force-cache lookup with no usable entry
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// Operation requires an identity the provider does not have
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Key material could not be loaded
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key-value store backend failure
    #[error("store error: {0}")]
    Store(String),

    /// JSON encoding or promotion failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything else (timeouts, socket failures, misconfiguration)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether the error indicates the resource is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Whether the error indicates the host should not be retried right now
    pub fn is_offline(&self) -> bool {
        matches!(self, ClientError::DomainOffline(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
