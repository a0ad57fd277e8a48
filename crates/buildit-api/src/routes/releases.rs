//! Milestone release endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use buildit_core::ResourceId;
use buildit_core::release::ProductMilestoneRelease;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/{milestone_id}/release", get(release_status).post(start_release))
}

#[derive(Debug, Deserialize)]
struct StartReleaseRequest {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct ReleaseStatusResponse {
    in_progress: bool,
    latest: Option<ProductMilestoneRelease>,
}

fn parse_id(raw: &str) -> Result<ResourceId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id '{}'", raw)))
}

async fn start_release(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
    Json(req): Json<StartReleaseRequest>,
) -> Result<(StatusCode, Json<ProductMilestoneRelease>), ApiError> {
    let milestone_id = parse_id(&milestone_id)?;
    let release = state
        .releases
        .start_release(milestone_id, &req.access_token)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(release)))
}

async fn release_status(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
) -> Result<Json<ReleaseStatusResponse>, ApiError> {
    let milestone_id = parse_id(&milestone_id)?;
    let latest = state.releases.latest_release(milestone_id).await?;
    Ok(Json(ReleaseStatusResponse {
        in_progress: !state.releases.no_release_in_progress(milestone_id).await?,
        latest,
    }))
}
