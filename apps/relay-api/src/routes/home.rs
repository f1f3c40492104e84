//! The browser chat client.

use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;

use crate::auth::basic::WebUiAuth;
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(index))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Web UI",
    security((), ("basic" = [])),
    responses(
        (status = 200, description = "Chat client page", body = String, content_type = "text/html"),
        (status = 401, description = "Missing or invalid credentials", body = crate::error::ApiErrorBody),
        (status = 404, description = "Web UI not installed", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn index(_auth: WebUiAuth, State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    match tokio::fs::read_to_string(&state.config.index_file).await {
        Ok(page) => Ok(Html(page)),
        Err(err) => {
            tracing::warn!(path = %state.config.index_file.display(), %err, "cannot read web UI file");
            Err(ApiError::not_found("Web UI not available"))
        }
    }
}
