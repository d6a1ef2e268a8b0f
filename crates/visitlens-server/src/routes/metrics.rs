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
use visitlens_core::metric::{evaluate_for_time_frame, CreateMetricRequest};

use crate::{error::AppError, routes::owner_scope, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ListMetricsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluateRequest {
    pub time_frame_id: String,
    /// Evaluate against one page's metrics instead of the site summary.
    pub path: Option<String>,
}

/// `POST /api/sites/{site_id}/metrics`
///
/// The formula is compiled before anything is stored, so syntax errors and
/// unknown field names answer 422.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create_metric(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateMetricRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    req.validate()?;
    let metric = state.store.create_metric(&scope.site_id, &req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": metric }))))
}

/// `GET /api/sites/{site_id}/metrics`
#[tracing::instrument(skip(state, headers))]
pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<ListMetricsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let metrics = state
        .store
        .list_metrics(&scope.site_id, query.include_inactive)
        .await?;
    Ok(Json(json!({ "data": metrics })))
}

/// `PATCH /api/sites/{site_id}/metrics/{metric_id}`
#[tracing::instrument(skip(state, headers, req))]
pub async fn set_metric_active(
    State(state): State<Arc<AppState>>,
    Path((site_id, metric_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<SetActiveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let metric = state
        .store
        .set_metric_active(&scope.site_id, &metric_id, req.is_active)
        .await?
        .ok_or_else(|| CoreError::not_found("metric", &metric_id))?;
    Ok(Json(json!({ "data": metric })))
}

/// `POST /api/sites/{site_id}/metrics/{metric_id}/evaluate`
#[tracing::instrument(skip(state, headers, req))]
pub async fn evaluate_metric(
    State(state): State<Arc<AppState>>,
    Path((site_id, metric_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let metric = state
        .store
        .get_metric(&scope.site_id, &metric_id)
        .await?
        .ok_or_else(|| CoreError::not_found("metric", &metric_id))?;
    let time_frame = state
        .store
        .get_time_frame(&scope, &req.time_frame_id)
        .await?
        .ok_or_else(|| CoreError::not_found("time_frame", &req.time_frame_id))?;
    let value = evaluate_for_time_frame(
        state.aggregator(),
        &metric,
        &time_frame,
        req.path.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "data": value })))
}
