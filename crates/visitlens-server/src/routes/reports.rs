use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use visitlens_core::error::CoreError;
use visitlens_core::report::CreateReportRequest;

use crate::{error::AppError, routes::owner_scope, state::AppState};

/// `GET /api/sites/{site_id}/reports`
#[tracing::instrument(skip(state, headers))]
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let reports = state.store.list_reports(&scope).await?;
    Ok(Json(json!({ "data": reports })))
}

/// `GET /api/sites/{site_id}/reports/{report_id}`
#[tracing::instrument(skip(state, headers))]
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path((site_id, report_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let report = state
        .store
        .get_report(&scope, &report_id)
        .await?
        .ok_or_else(|| CoreError::not_found("report", &report_id))?;
    Ok(Json(json!({ "data": report })))
}

/// `POST /api/sites/{site_id}/reports`
///
/// The report starts as `draft`; nothing is aggregated until it is
/// generated.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let report = state.generator.create_report(&scope, &req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": report }))))
}

/// `POST /api/sites/{site_id}/reports/{report_id}/generate`
///
/// Runs synchronously and returns the committed report. A generation that
/// loses the race twice to concurrent generations answers 409.
#[tracing::instrument(skip(state, headers))]
pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    Path((site_id, report_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let report = state.generator.generate(&scope, &report_id).await?;
    Ok(Json(json!({ "data": report })))
}
