//! Error types for the log operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur while discovering, rendering or reconciling
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (bad CR contents, bad operator settings)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A Secret or ConfigMap exists but lacks a required field
    #[error("Expected {kind} {name:?} to have a field named {field:?}")]
    MissingField {
        kind: &'static str,
        name: String,
        field: String,
    },

    /// Endpoint not in `proto://host:port` form
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Quantity string could not be parsed
    #[error("Invalid quantity {0:?}")]
    InvalidQuantity(String),

    /// Certificate generation or parsing failed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Platform discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl OperatorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            OperatorError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            OperatorError::NotFound(_) => true,
            _ => false,
        }
    }
}

impl From<rcgen::Error> for OperatorError {
    fn from(err: rcgen::Error) -> Self {
        OperatorError::Certificate(err.to_string())
    }
}

/// Returns true when a raw kube error is a 404.
pub fn is_kube_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
