//! Build submission and inspection endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use buildit_coordinator::BuildCoordinator;
use buildit_core::build::{BuildConfiguration, BuildRecord};
use buildit_core::{ResourceId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_running).post(submit_build))
        .route("/{configuration_id}/records", get(list_records))
}

#[derive(Debug, Deserialize)]
struct SubmitBuildRequest {
    configuration: BuildConfiguration,
    callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct BuildResponse {
    configuration_id: ResourceId,
    configuration_name: String,
    status: TaskStatus,
}

fn coordinator(state: &AppState) -> Result<&Arc<BuildCoordinator>, ApiError> {
    state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("no build driver configured".to_string()))
}

async fn submit_build(
    State(state): State<AppState>,
    Json(req): Json<SubmitBuildRequest>,
) -> Result<(StatusCode, Json<BuildResponse>), ApiError> {
    let handle = coordinator(&state)?.build(req.configuration, req.callback_url)?;
    let task = handle.task();
    Ok((
        StatusCode::ACCEPTED,
        Json(BuildResponse {
            configuration_id: task.identity().configuration_id(),
            configuration_name: task.job_configuration().configuration.name.clone(),
            status: handle.status(),
        }),
    ))
}

async fn list_running(State(state): State<AppState>) -> Result<Json<Vec<BuildResponse>>, ApiError> {
    let running = coordinator(&state)?.running().snapshot();
    let response = running
        .into_iter()
        .map(|task| BuildResponse {
            configuration_id: task.identity().configuration_id(),
            configuration_name: task.job_configuration().configuration.name.clone(),
            status: task.status(),
        })
        .collect();
    Ok(Json(response))
}

async fn list_records(
    State(state): State<AppState>,
    Path(configuration_id): Path<String>,
) -> Result<Json<Vec<BuildRecord>>, ApiError> {
    let configuration_id: ResourceId = configuration_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id '{}'", configuration_id)))?;
    let records = state
        .repos
        .build_records
        .list_by_configuration(configuration_id)
        .await?;
    Ok(Json(records))
}
