//! Delegation errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type for delegation operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced at the delegator's HTTP edge.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No bearer token on the request.
    #[error("no authentication provided")]
    NoAuth,

    /// Token present but unparseable, invalid, or missing the `id` claim.
    #[error("invalid authentication provided")]
    InvalidAuth,

    /// The access checker denied the user.
    #[error("user does not have access to network '{0}'")]
    Forbidden(String),

    /// The requested feature is not a proxyable node endpoint.
    #[error("invalid feature '{0}'")]
    UnknownFeature(String),

    /// The network is not in the registry.
    #[error("network '{0}' not found")]
    NetworkNotFound(String),

    /// The downstream node did not accept the proxied request.
    #[error("proxy error: {0}")]
    Proxy(#[from] reqwest::Error),
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NoAuth | Self::InvalidAuth => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UnknownFeature(_) => StatusCode::BAD_REQUEST,
            Self::NetworkNotFound(_) => StatusCode::NOT_FOUND,
            Self::Proxy(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
