//! Error types for the push hub

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the push hub
///
/// Registry operations never return these: delivery failures end in client
/// removal and unknown targets are skipped. Errors only come from inbound
/// control requests and from configuring the hub.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound control request is missing required fields or is malformed
    #[error("{0}")]
    BadRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a malformed request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        crate::auth::deny_json(status, serde_json::json!({ "error": self.to_string() }))
    }
}
