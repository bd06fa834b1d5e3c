//! Error types for avtaler
//!
//! One error enum for the whole service. Every variant knows its HTTP status,
//! so route handlers only have to render it.

use hyper::StatusCode;

/// Main error type for agreement operations
#[derive(Debug, thiserror::Error)]
pub enum AvtaleError {
    /// The identity provider refused or failed a token request
    #[error("Token broker error: {0}")]
    AuthBroker(String),

    /// Caller lacks the signing entitlement for the organization
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Enhetsregisteret could not be reached or answered unexpectedly
    #[error("Registry lookup failed: {0}")]
    RegistryLookup(String),

    /// Enhetsregisteret does not know the organization
    #[error("Unknown organization: {0}")]
    OrganizationUnknown(String),

    /// Job submission, status poll or document download failed
    #[error("Signature provider error: {0}")]
    SignatureProvider(String),

    /// Reconciliation requested without a prior signing job
    #[error("No pending signing job for organization {0}")]
    NoPendingJob(String),

    /// A write that had to touch a document touched none
    #[error("Store error: {0}")]
    Store(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other upstream service (PDL, bucket metadata server, ...)
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AvtaleError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthBroker(_) => StatusCode::BAD_GATEWAY,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RegistryLookup(_) => StatusCode::BAD_GATEWAY,
            Self::OrganizationUnknown(_) => StatusCode::NOT_FOUND,
            Self::SignatureProvider(_) => StatusCode::BAD_GATEWAY,
            Self::NoPendingJob(_) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Archive(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used as the `error` field of JSON bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthBroker(_) => "auth_broker_error",
            Self::Forbidden(_) => "forbidden",
            Self::RegistryLookup(_) => "registry_lookup_error",
            Self::OrganizationUnknown(_) => "organization_unknown",
            Self::SignatureProvider(_) => "signature_provider_error",
            Self::NoPendingJob(_) => "no_pending_job",
            Self::Store(_) => "store_error",
            Self::Archive(_) => "archive_error",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream_error",
            Self::Config(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, body)
    }
}

impl From<std::io::Error> for AvtaleError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AvtaleError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for AvtaleError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for AvtaleError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias for agreement operations
pub type Result<T> = std::result::Result<T, AvtaleError>;
