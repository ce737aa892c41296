//! Trusted-identity middleware: reads the caller identity an upstream
//! collaborator has already authenticated, and attaches it to the request
//! as a [`CallerId`] extension -- validate, insert into
//! `req.extensions_mut()`, reject with a structured JSON body on failure --
//! without this crate owning token issuance.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

const CALLER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// Requires `X-User-Id` (the identity an external auth collaborator
/// attaches once it has validated the caller) and rejects its absence
/// with 401 rather than silently proceeding as anonymous.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, AuthError> {
    let user_id = req
        .headers()
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingCaller)?
        .to_string();

    req.extensions_mut().insert(CallerId(user_id));
    Ok(next.run(req).await)
}

pub fn extract_caller(req: &Request) -> Option<&CallerId> {
    req.extensions().get::<CallerId>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingCaller,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AuthError::MissingCaller => (StatusCode::UNAUTHORIZED, "missing caller identity"),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn extract_caller_reads_inserted_extension() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_caller(&req).is_none());
        req.extensions_mut().insert(CallerId("u1".to_string()));
        assert_eq!(extract_caller(&req), Some(&CallerId("u1".to_string())));
    }

    #[test]
    fn missing_caller_error_is_unauthorized() {
        let response = AuthError::MissingCaller.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
