//! Inbound callback for the remote workflow engine.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use buildit_core::CorrelationId;
use buildit_workflow::DispatchOutcome;
use serde::Serialize;
use serde_json::Value;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/callback/{correlation_id}/{event_type}", post(callback))
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    delivered: bool,
}

/// Unmatched events are acknowledged too; the engine has nothing to retry.
async fn callback(
    State(state): State<AppState>,
    Path((correlation_id, event_type)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<CallbackResponse>) {
    let outcome = state
        .correlator
        .dispatch_named(&CorrelationId::new(correlation_id), &event_type, payload)
        .await;
    (
        StatusCode::ACCEPTED,
        Json(CallbackResponse {
            delivered: outcome == DispatchOutcome::Delivered,
        }),
    )
}
