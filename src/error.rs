// src/error.rs
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("No eligible backends available")]
    NoEligibleBackend,

    #[error("Backend {backend} timed out after {timeout:?}")]
    UpstreamTimeout { backend: String, timeout: Duration },

    #[error("Backend {backend} failed: {message}")]
    UpstreamError { backend: String, message: String },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Backend already registered: {0}")]
    DuplicateBackend(String),

    #[error("Invalid backend specification: {0}")]
    InvalidBackend(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
}

impl RoutingError {
    /// HTTP status reported to callers of `route` and the admin surface.
    pub fn status_code(&self) -> u16 {
        match self {
            RoutingError::NoEligibleBackend => 503,
            RoutingError::UpstreamTimeout { .. } => 504,
            RoutingError::UpstreamError { .. } => 502,
            RoutingError::UnknownBackend(_) => 404,
            RoutingError::DuplicateBackend(_) => 409,
            RoutingError::InvalidBackend(_) | RoutingError::UnknownStrategy(_) => 400,
        }
    }

    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            RoutingError::UpstreamTimeout { .. } | RoutingError::UpstreamError { .. }
        )
    }
}
