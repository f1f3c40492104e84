use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::Config;
use relay_api::gateway::Hub;
use relay_api::AppState;

/// How long in-flight HTTP requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_args();
    let addr = config.addr;

    let hub = Hub::spawn(config.hub_config());
    for room in config.initial_rooms() {
        if let Err(err) = hub.create_room(&room) {
            tracing::warn!(%room, %err, "skipping configured room");
        }
    }

    tracing::info!(
        allow_dynamic_rooms = config.allow_dynamic_rooms,
        rooms = hub.room_count(),
        basic_auth = config.basic_auth().is_some(),
        allowed_origins = ?config.allowed_origins,
        "relay-api configured"
    );

    let state = AppState {
        hub: Arc::clone(&hub),
        config: Arc::new(config),
    };

    let app = relay_api::routes::router(&state)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, "relay-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    let _ = stop_tx.send(());

    match time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::error!(%err, "server error"),
        Ok(Err(err)) => tracing::error!(%err, "server task failed"),
        Err(_) => tracing::warn!("server did not stop within grace period"),
    }

    hub.shutdown();
    tracing::info!("relay-api stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
