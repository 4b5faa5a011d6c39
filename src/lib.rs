//! Room-based signaling relay for browser video calls.
//!
//! Clients connect over a WebSocket at `/ws`, join a named room and exchange
//! WebRTC negotiation payloads and chat lines with the other members. The
//! relay never looks inside signal payloads and keeps nothing once a room
//! empties.

pub mod app_state;
pub mod config;
pub mod error;
pub mod relay;
pub mod room;
pub mod signal;
pub mod ws;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub use app_state::AppState;
pub use config::{Config, Limits};
pub use error::{DeliveryFailure, ProtocolError, ServerError};
pub use relay::{RelayHandle, RelayState, RelayStats};
pub use signal::{InboundEvent, OutboundEvent, PeerInfo};

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health));

    if let Some(dir) = &state.config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.relay.stats().await {
        Some(stats) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "rooms": stats.rooms,
                "connections": stats.connections,
            })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "relay-stopped" })),
        ),
    }
}
