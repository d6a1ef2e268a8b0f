use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSessionRequest {
    pub visitor_id: String,
}

/// `POST /api/sites/{site_id}/sessions`
#[tracing::instrument(skip(state, req))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Json(req): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.visitor_id.trim().is_empty() {
        return Err(AppError::BadRequest {
            message: "visitor_id must not be empty".to_string(),
            field: Some("visitor_id"),
        });
    }
    let session = state
        .store
        .start_session(&site_id, &req.visitor_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": session }))))
}

/// `POST /api/sites/{site_id}/sessions/{session_id}/end`
///
/// Idempotent: ending an ended session returns it unchanged.
#[tracing::instrument(skip(state))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path((site_id, session_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .store
        .end_session(&site_id, &session_id, Utc::now())
        .await?;
    Ok(Json(json!({ "data": session })))
}
