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

use visitlens_core::event::TrackPageView;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageViewRequest {
    pub visitor_id: String,
    pub session_id: String,
    pub url: String,
    /// Derived from `url` when absent.
    pub path: Option<String>,
    pub title: Option<String>,
    pub duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDurationRequest {
    pub duration: i64,
}

/// Path component of a page URL. Absolute URLs are parsed with `url`;
/// anything else is treated as already relative and stripped of its query
/// string and fragment.
pub fn path_from_url(raw: &str) -> String {
    let path = match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

/// `POST /api/sites/{site_id}/pageviews`
#[tracing::instrument(skip(state, req))]
pub async fn record_page_view(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Json(req): Json<PageViewRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.url.trim().is_empty() {
        return Err(AppError::BadRequest {
            message: "url must not be empty".to_string(),
            field: Some("url"),
        });
    }
    let path = match req.path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => path_from_url(req.url.trim()),
    };
    let track = TrackPageView {
        visitor_id: req.visitor_id,
        session_id: req.session_id,
        url: req.url,
        path,
        title: req.title.filter(|t| !t.trim().is_empty()),
        duration: req.duration,
    };
    let page_view = state
        .store
        .record_page_view(&site_id, &track, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": page_view }))))
}

/// `PATCH /api/sites/{site_id}/pageviews/{page_view_id}`
///
/// Records the time spent on the page; bounce flags of the whole session
/// are recomputed.
#[tracing::instrument(skip(state, req))]
pub async fn update_page_view(
    State(state): State<Arc<AppState>>,
    Path((site_id, page_view_id)): Path<(String, String)>,
    Json(req): Json<UpdateDurationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.duration < 0 {
        return Err(AppError::BadRequest {
            message: "duration must be non-negative".to_string(),
            field: Some("duration"),
        });
    }
    let page_view = state
        .store
        .update_page_view_duration(&site_id, &page_view_id, req.duration)
        .await?;
    Ok(Json(json!({ "data": page_view })))
}
