use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use visitlens_core::error::CoreError;
use visitlens_core::timeframe::{resolve_buckets, CreateTimeFrameRequest, Granularity};

use crate::{error::AppError, routes::owner_scope, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BucketsQuery {
    /// Overrides the time frame's own granularity.
    pub granularity: Option<String>,
}

/// `POST /api/sites/{site_id}/timeframes`
#[tracing::instrument(skip(state, headers, req))]
pub async fn create_time_frame(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateTimeFrameRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let (range, granularity) = req.validate()?;
    let time_frame = state
        .store
        .create_time_frame(&scope, &req.name, &range, granularity)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": time_frame }))))
}

/// `GET /api/sites/{site_id}/timeframes`
#[tracing::instrument(skip(state, headers))]
pub async fn list_time_frames(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let time_frames = state.store.list_time_frames(&scope).await?;
    Ok(Json(json!({ "data": time_frames })))
}

/// `GET /api/sites/{site_id}/timeframes/{time_frame_id}/buckets`
///
/// Bucket boundaries follow the server's configured timezone.
#[tracing::instrument(skip(state, headers))]
pub async fn time_frame_buckets(
    State(state): State<Arc<AppState>>,
    Path((site_id, time_frame_id)): Path<(String, String)>,
    Query(query): Query<BucketsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let time_frame = state
        .store
        .get_time_frame(&scope, &time_frame_id)
        .await?
        .ok_or_else(|| CoreError::not_found("time_frame", &time_frame_id))?;
    let granularity = match query.granularity.as_deref() {
        Some(raw) => raw.parse::<Granularity>()?,
        None => time_frame.granularity,
    };
    let buckets = resolve_buckets(
        granularity,
        &time_frame.range()?,
        state.config.aggregation.timezone,
    )?;
    Ok(Json(json!({
        "data": {
            "time_frame_id": time_frame.id,
            "granularity": granularity,
            "buckets": buckets,
        }
    })))
}
