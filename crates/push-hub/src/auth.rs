//! Identity resolution for stream connections
//!
//! The hub does not authenticate anyone itself. An optional callback looks at
//! the request and reports the session user, if there is one.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Request context passed to the auth callback
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// HTTP method (usually GET for SSE)
    pub method: Method,
    /// Full request URI (path + query string)
    pub uri: Uri,
    /// HTTP headers from the request
    pub headers: HeaderMap,
    /// The `userId` query parameter, if given
    pub requested_user_id: Option<String>,
    /// Client IP address (from X-Forwarded-For)
    pub client_ip: Option<String>,
}

impl AuthRequest {
    /// Get a header value as string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the Bearer token from Authorization header
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
    }

    /// Get the request path
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Auth callback result.
///
/// `Ok(Some(user))` is an authenticated session, `Ok(None)` means no session
/// (the connection may still be anonymous or use the requested id), and
/// `Err(response)` rejects the connection.
pub type AuthResponse = Result<Option<String>, Response>;

/// Type alias for the async auth callback function
pub type AuthFn = Arc<
    dyn Fn(AuthRequest) -> Pin<Box<dyn Future<Output = AuthResponse> + Send>> + Send + Sync,
>;

/// Helper to create an auth callback from a closure
pub fn auth_fn<F, Fut>(f: F) -> AuthFn
where
    F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AuthResponse> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Pick the user id a connection is admitted with.
///
/// A session user always wins. Without a session the requested id is taken
/// as-is, which allows anonymous and test connections to name themselves.
pub fn resolve_user_id(session_user: Option<String>, requested: Option<String>) -> Option<String> {
    let non_empty = |user: &String| !user.is_empty();
    session_user.filter(non_empty).or(requested.filter(non_empty))
}

/// Helper to create a simple error response
pub fn deny(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// Helper to create a JSON error response
pub fn deny_json(status: StatusCode, body: impl serde::Serialize) -> Response {
    (status, axum::Json(body)).into_response()
}
