use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Tracking routes (`visitors`, `sessions`, `pageviews`, `events`,
/// `conversions`) are open; everything else needs the `x-user-id` header.
///
/// Middleware is applied in outer-to-inner order:
///
/// 1. `TraceLayer`: structured request/response logging via `tracing`.
/// 2. `CorsLayer`: permissive CORS, tracking calls come from third-party
///    pages.
pub fn build_app(state: Arc<AppState>) -> Router {
    let site_routes = Router::new()
        // Tracking
        .route("/visitors/track", post(routes::visitors::track_visitor))
        .route("/sessions", post(routes::sessions::start_session))
        .route(
            "/sessions/{session_id}/end",
            post(routes::sessions::end_session),
        )
        .route("/pageviews", post(routes::pageviews::record_page_view))
        .route(
            "/pageviews/{page_view_id}",
            patch(routes::pageviews::update_page_view),
        )
        .route("/events", post(routes::events::record_event))
        .route("/conversions", post(routes::conversions::record_conversion))
        // Time frames
        .route(
            "/timeframes",
            get(routes::timeframes::list_time_frames).post(routes::timeframes::create_time_frame),
        )
        .route(
            "/timeframes/{time_frame_id}/buckets",
            get(routes::timeframes::time_frame_buckets),
        )
        // Reports
        .route(
            "/reports",
            get(routes::reports::list_reports).post(routes::reports::create_report),
        )
        .route("/reports/{report_id}", get(routes::reports::get_report))
        .route(
            "/reports/{report_id}/generate",
            post(routes::reports::generate_report),
        )
        // Metrics
        .route(
            "/metrics",
            get(routes::metrics::list_metrics).post(routes::metrics::create_metric),
        )
        .route(
            "/metrics/{metric_id}",
            patch(routes::metrics::set_metric_active),
        )
        .route(
            "/metrics/{metric_id}/evaluate",
            post(routes::metrics::evaluate_metric),
        )
        // Ad-hoc aggregates
        .route("/summary", get(routes::summary::site_summary))
        .route(
            "/visitors/{visitor_id}/analytics",
            get(routes::visitors::visitor_analytics),
        )
        .route(
            "/visitors/{visitor_id}/journey",
            get(routes::visitors::visitor_journey),
        )
        .route(
            "/visitors/{visitor_id}/location",
            post(routes::visitors::update_location),
        )
        .route("/pages/timeseries", get(routes::summary::pages_timeseries));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api/sites/{site_id}", site_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
