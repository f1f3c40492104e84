pub mod health;
pub mod home;
pub mod rooms;

use axum::middleware;
use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::origin::AllowedOrigin;
use crate::AppState;

/// All HTTP routes. The rooms API carries the configured CORS policy, behind
/// the origin check so that preflights from unlisted origins are refused too.
pub fn router(state: &AppState) -> Router<AppState> {
    let rooms = rooms::router()
        .layer(state.config.cors_layer())
        .layer(middleware::from_extractor_with_state::<AllowedOrigin, _>(
            state.clone(),
        ));

    Router::new()
        .merge(health::router())
        .merge(home::router())
        .merge(crate::gateway::server::router())
        .merge(rooms)
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "basic",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Web UI
        home::index,
        // Rooms
        rooms::list_rooms,
        rooms::create_room,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Route request/response types
            health::HealthResponse,
            rooms::RoomsResponse,
            rooms::CreateRoomRequest,
            rooms::CreateRoomResponse,
            crate::gateway::RoomInfo,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Web UI", description = "Browser chat client"),
        (name = "Rooms", description = "Room directory"),
    )
)]
pub struct ApiDoc;
