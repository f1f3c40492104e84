//! Origin allow-list check shared by the WebSocket endpoint and the rooms API.

use axum::extract::FromRequestParts;
use axum::http::header::ORIGIN;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::AppState;

/// Extracted when the request's `Origin` is acceptable: no allow-list is
/// configured, the header is absent (non-browser client), or it is listed.
#[derive(Debug, Clone)]
pub struct AllowedOrigin(pub Option<String>);

impl FromRequestParts<AppState> for AllowedOrigin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let origin = parts
            .headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match origin.as_deref() {
            Some(origin) if !state.config.origin_allowed(origin) => {
                tracing::warn!(%origin, path = %parts.uri.path(), "rejected request from origin");
                Err(ApiError::forbidden("Origin not allowed"))
            }
            _ => Ok(AllowedOrigin(origin)),
        }
    }
}
