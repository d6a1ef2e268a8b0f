use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use visitlens_core::event::NewVisit;

use crate::{
    error::AppError,
    routes::{owner_scope, summary::RangeQuery},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackVisitorRequest {
    pub referrer: Option<String>,
    pub authenticated_user_id: Option<String>,
}

/// `POST /api/sites/{site_id}/visitors/track`: find-or-create the visitor
/// behind this request.
///
/// Identity is `(ip, user_agent)` for anonymous traffic, or the supplied
/// authenticated user id. Enrichment performed server-side:
/// - `country`, `city`: GeoIP via `maxminddb` (skipped if .mmdb absent).
/// - `browser`, `os`, `device_type`: parsed from the `User-Agent` header
///   via `woothee`.
#[tracing::instrument(skip(state, headers, body))]
pub async fn track_visitor(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    // The body is optional; a bare POST tracks an anonymous visitor.
    let req: TrackVisitorRequest = if body.is_empty() {
        TrackVisitorRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::bad_request(e.to_string()))?
    };

    let ip_address = extract_client_ip(&headers);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let geo = state.lookup_geo(&ip_address).unwrap_or_default();
    let ua = parse_user_agent(&user_agent);

    let visit = NewVisit {
        site_id,
        ip_address,
        user_agent,
        referrer: req.referrer.filter(|r| !r.trim().is_empty()),
        authenticated_user_id: req.authenticated_user_id,
        country: geo.country,
        city: geo.city,
        device_type: ua.as_ref().map(|u| u.device_type.clone()),
        browser: ua.as_ref().map(|u| u.browser.clone()),
        os: ua.as_ref().map(|u| u.os.clone()),
    };
    let visitor = state.store.track_visitor(&visit, Utc::now()).await?;

    Ok((StatusCode::OK, Json(json!({ "data": visitor }))))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// `POST /api/sites/{site_id}/visitors/{visitor_id}/location`
///
/// Manual override for when GeoIP is missing or wrong. Blank values clear
/// the field.
#[tracing::instrument(skip(state, headers, req))]
pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Path((site_id, visitor_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let country = req.country.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let city = req.city.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let visitor = state
        .store
        .update_visitor_location(&scope.site_id, &visitor_id, country, city)
        .await?;
    Ok(Json(json!({ "data": visitor })))
}

/// `GET /api/sites/{site_id}/visitors/{visitor_id}/analytics`
#[tracing::instrument(skip(state, headers))]
pub async fn visitor_analytics(
    State(state): State<Arc<AppState>>,
    Path((site_id, visitor_id)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let range = query.range(Utc::now())?;
    let analytics = state
        .aggregator()
        .visitor_analytics(&scope.site_id, &visitor_id, range)
        .await?;
    Ok(Json(json!({ "data": analytics })))
}

/// `GET /api/sites/{site_id}/visitors/{visitor_id}/journey`
#[tracing::instrument(skip(state, headers))]
pub async fn visitor_journey(
    State(state): State<Arc<AppState>>,
    Path((site_id, visitor_id)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let range = query.range(Utc::now())?;
    let journey = state
        .aggregator()
        .visitor_journey(&scope.site_id, &visitor_id, range)
        .await?;
    Ok(Json(json!({ "data": journey })))
}

/// Extract the real client IP from `X-Forwarded-For` (first entry).
///
/// Falls back to `"unknown"` when the header is absent.
fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parsed User-Agent fields.
#[derive(Debug)]
struct UaInfo {
    browser: String,
    os: String,
    device_type: String,
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// Returns `None` if the UA string is empty or `woothee` cannot classify it.
fn parse_user_agent(user_agent: &str) -> Option<UaInfo> {
    if user_agent.is_empty() {
        return None;
    }

    let result = woothee::parser::Parser::new().parse(user_agent)?;

    //   "smartphone" | "mobilephone" -> "mobile"
    //   "tablet"                     -> "tablet"
    //   everything else              -> "desktop"
    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
    .to_string();

    Some(UaInfo {
        browser: result.name.to_string(),
        os: result.os.to_string(),
        device_type,
    })
}
