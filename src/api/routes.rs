use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::api::{handlers, state::AppState};

/// The ingest surface is server-to-server (webhooks, internal producers),
/// so there is no browser origin to allow and no CORS layer here.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/events/ingest", post(handlers::ingest_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
