use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use visitlens_core::config::{AggregationSettings, Config};
use visitlens_duckdb::DuckDbBackend;
use visitlens_server::app::build_app;
use visitlens_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/visitlens-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        aggregation: AggregationSettings::default(),
    }
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

#[tokio::test]
async fn test_health_returns_200_when_db_reachable() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let state = Arc::new(AppState::new(db, test_config()));
    let app = build_app(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let app = build_app(Arc::new(AppState::new(db, test_config())));

    let request = Request::builder()
        .method("GET")
        .uri("/api/nope")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
