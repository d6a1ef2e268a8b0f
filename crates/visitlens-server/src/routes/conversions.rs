use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;

use visitlens_core::event::TrackConversion;

use crate::{error::AppError, state::AppState};

/// `POST /api/sites/{site_id}/conversions`
#[tracing::instrument(skip(state, req))]
pub async fn record_conversion(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Json(req): Json<TrackConversion>,
) -> Result<impl IntoResponse, AppError> {
    if req.conversion_type.trim().is_empty() {
        return Err(AppError::BadRequest {
            message: "conversion_type must not be empty".to_string(),
            field: Some("conversion_type"),
        });
    }
    let conversion = state
        .store
        .record_conversion(&site_id, &req, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": conversion }))))
}
