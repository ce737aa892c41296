//! HTTP surface: the endpoints external callers use to deploy a strategy,
//! manage subscriptions, and read execution stats. Authentication itself
//! lives upstream of this crate; every handler trusts the
//! [`crate::auth::CallerId`] an upstream collaborator has already attached.

pub mod routes;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::EngineError;

pub use routes::router;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: Option<String>,
}

/// Maps the engine's internal error taxonomy onto user-visible status
/// codes: validation/contention -> 400, not found -> 404, everything else
/// (broker/runtime/cache/store/invariant) -> 500.
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnsupportedResolution(_)
            | EngineError::MissingStrategyConfig { .. }
            | EngineError::AlreadySubscribed { .. }
            | EngineError::LeverageExceedsLimit { .. }
            | EngineError::QuantityTooSmall
            | EngineError::EmptyIdentifier
            | EngineError::LockHeld { .. } => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}
