use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{header, HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::gateway::server::DEFAULT_ROOM;
use crate::gateway::HubConfig;

/// Relay API configuration, read from command-line flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-api", version, about = "Real-time chat room relay")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(long, env = "RELAY_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Allow clients to join rooms that were never created.
    #[arg(long, env = "RELAY_ALLOW_DYNAMIC_ROOMS")]
    pub allow_dynamic_rooms: bool,

    /// Rooms created at startup (comma-separated).
    #[arg(long, env = "RELAY_ROOMS", value_delimiter = ',')]
    pub rooms: Vec<String>,

    /// Basic auth username for the web UI.
    #[arg(long, env = "RELAY_AUTH_USER", requires = "auth_password")]
    pub auth_user: Option<String>,

    /// Basic auth password for the web UI.
    #[arg(long, env = "RELAY_AUTH_PASSWORD", requires = "auth_user")]
    pub auth_password: Option<String>,

    /// Origins allowed to use the API and WebSocket (comma-separated). Empty
    /// allows every origin.
    #[arg(long, env = "RELAY_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// HTML file served at `/`.
    #[arg(long, env = "RELAY_INDEX_FILE", default_value = "static/index.html")]
    pub index_file: PathBuf,
}

impl Config {
    /// Parse flags, falling back to environment variables.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        config.normalize();
        config
    }

    /// Trim list entries and drop empty ones (`a, b,` → `["a", "b"]`).
    pub fn normalize(&mut self) {
        for list in [&mut self.rooms, &mut self.allowed_origins] {
            *list = list
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            allow_dynamic_rooms: self.allow_dynamic_rooms,
            ..HubConfig::default()
        }
    }

    /// Rooms to predefine at startup. Without dynamic rooms a server needs at
    /// least one, so `lobby` is used when none are configured.
    pub fn initial_rooms(&self) -> Vec<String> {
        if self.rooms.is_empty() && !self.allow_dynamic_rooms {
            vec![DEFAULT_ROOM.to_string()]
        } else {
            self.rooms.clone()
        }
    }

    /// Web UI credentials, when both halves are set and non-empty.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.auth_user.as_deref(), self.auth_password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
    }

    /// CORS policy for the rooms API.
    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        if self.allowed_origins.is_empty() {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
