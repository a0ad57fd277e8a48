//! API routes.

pub mod builds;
pub mod health;
pub mod releases;
pub mod workflow;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .route("/ws", get(ws_handler))
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/builds", builds::router())
        .nest("/milestones", releases::router())
        .nest("/workflow", workflow::router())
}
