use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use visitlens_core::event::TrackEvent;

use crate::{error::AppError, state::AppState};

/// `POST /api/sites/{site_id}/events`
///
/// `event_type` must be one of `click`, `scroll`, `form_submit`, `download`
/// or `custom`; anything else is rejected by the JSON extractor.
#[tracing::instrument(skip(state, req))]
pub async fn record_event(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Json(req): Json<TrackEvent>,
) -> Result<impl IntoResponse, AppError> {
    let event = state.store.record_event(&site_id, &req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": event }))))
}
