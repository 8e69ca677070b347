//! Route definitions for the ChannelHub HTTP surface.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the Axum router.
///
/// `/ws` upgrades into a hub connection; `/api/health*` report liveness.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(handlers::ws::ws_upgrade))
        .fallback(handlers::fallback::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
