//! Room directory endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::RoomInfo;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/rooms", get(list_rooms).post(create_room))
}

// ---------------------------------------------------------------------------
// GET /api/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomInfo>,
}

#[utoipa::path(
    get,
    path = "/api/rooms",
    tag = "Rooms",
    responses(
        (status = 200, description = "Joinable rooms with their member counts", body = RoomsResponse),
        (status = 403, description = "Origin not allowed", body = ApiErrorBody),
    ),
)]
pub async fn list_rooms(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.hub.list_rooms(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRoomResponse {
    pub status: String,
    pub name: String,
}

#[utoipa::path(
    post,
    path = "/api/rooms",
    tag = "Rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 403, description = "Origin not allowed", body = ApiErrorBody),
        (status = 409, description = "Room already exists", body = ApiErrorBody),
    ),
)]
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::validation(vec![FieldError {
            field: "name".to_string(),
            message: "Room name is required".to_string(),
        }]));
    }

    state.hub.create_room(&body.name)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            status: "created".to_string(),
            name: body.name,
        }),
    ))
}
