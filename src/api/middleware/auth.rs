//! Shared-secret authentication middleware

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header carrying the shared API secret
pub const SECRET_HEADER: &str = "X-COLLECTOR-SECRET";

/// Authentication middleware
///
/// Rejects every request whose `X-COLLECTOR-SECRET` header does not carry
/// the configured secret.
pub async fn auth_middleware(
    State(expected_secret): State<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let secret = request
        .headers()
        .get(SECRET_HEADER)
        .ok_or(AuthError::MissingSecret)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    if secret != expected_secret {
        return Err(AuthError::InvalidSecret);
    }

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingSecret,
    InvalidFormat,
    InvalidSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSecret => (StatusCode::UNAUTHORIZED, "Missing X-COLLECTOR-SECRET header"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "Malformed X-COLLECTOR-SECRET header"),
            AuthError::InvalidSecret => (StatusCode::FORBIDDEN, "Invalid secret"),
        };

        (status, message).into_response()
    }
}
