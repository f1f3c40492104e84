//! HTTP basic authentication for the web UI.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::AppState;

/// Proof that the request carried the configured web UI credentials, or that
/// none are configured.
#[derive(Debug, Clone)]
pub struct WebUiAuth;

/// Rejection returned when credentials are missing or wrong.
#[derive(Debug)]
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, r#"Basic realm="Restricted""#)],
            Json(body),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for WebUiAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some((user, password)) = state.config.basic_auth() else {
            return Ok(WebUiAuth);
        };

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError {
                message: "Missing Authorization header",
            })?;

        let (given_user, given_password) = decode_credentials(header).ok_or(AuthError {
            message: "Invalid Authorization header format",
        })?;

        // Evaluate both comparisons so timing does not reveal which one failed.
        let user_ok = constant_time_eq(given_user.as_bytes(), user.as_bytes());
        let password_ok = constant_time_eq(given_password.as_bytes(), password.as_bytes());
        if !(user_ok & password_ok) {
            return Err(AuthError {
                message: "Invalid credentials",
            });
        }

        Ok(WebUiAuth)
    }
}

/// Parse `Basic <base64(user:password)>`.
fn decode_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Compare two secrets in time independent of where they differ. Both sides
/// are hashed first so their lengths do not leak either.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let a = Sha256::digest(a);
    let b = Sha256::digest(b);
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
