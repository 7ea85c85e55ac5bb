//! Token check for the routes that change stored state.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Require `Authorization: Bearer <auth.upload_token>` when a token is
/// configured. Passes everything through otherwise.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    if let Some(token) = state.upload_token.as_deref() {
        if bearer_token(req.headers()) != Some(token) {
            tracing::warn!(uri = %req.uri(), "rejected request without a valid token");
            return Err(ApiError::Unauthorized(
                "missing or invalid bearer token".to_string(),
            ));
        }
    }
    Ok(next.run(req).await)
}

/// The credential of an `Authorization: Bearer` header. The scheme is
/// case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        Some(value[7..].trim())
    } else {
        None
    }
}
