use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use visitlens_core::config::{AggregationSettings, Config};
use visitlens_duckdb::DuckDbBackend;
use visitlens_server::app::build_app;
use visitlens_server::state::AppState;

const SITE: &str = "site_1";
const USER: &str = "user_1";
const FIREFOX_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0";

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/visitlens-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        aggregation: AggregationSettings::default(),
    }
}

fn setup() -> axum::Router {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    build_app(Arc::new(AppState::new(db, test_config())))
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

async fn send(app: &axum::Router, request: Request<Body>) -> axum::http::Response<Body> {
    app.clone().oneshot(request).await.expect("request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn get_as_owner(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-user-id", USER)
        .body(Body::empty())
        .expect("build request")
}

fn post_as_owner(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", USER)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

async fn track_visitor(app: &axum::Router, ip: &str) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/sites/{SITE}/visitors/track"))
        .header("user-agent", FIREFOX_UA)
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .expect("build request");
    let response = send(app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["data"].clone()
}

async fn start_session(app: &axum::Router, visitor_id: &str) -> Value {
    let response = send(
        app,
        post_json(
            &format!("/api/sites/{SITE}/sessions"),
            json!({ "visitor_id": visitor_id }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["data"].clone()
}

async fn page_view(app: &axum::Router, visitor_id: &str, session_id: &str, url: &str) -> Value {
    let response = send(
        app,
        post_json(
            &format!("/api/sites/{SITE}/pageviews"),
            json!({
                "visitor_id": visitor_id,
                "session_id": session_id,
                "url": url,
                "duration": 20,
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["data"].clone()
}

#[tokio::test]
async fn test_same_ip_and_user_agent_is_one_visitor() {
    let app = setup();
    let first = track_visitor(&app, "203.0.113.7").await;
    let second = track_visitor(&app, "203.0.113.7, 10.0.0.1").await;
    let other = track_visitor(&app, "203.0.113.8").await;

    assert_eq!(first["id"], second["id"]);
    assert_ne!(first["id"], other["id"]);
    assert_eq!(first["ip_address"], "203.0.113.7");
    assert_eq!(first["browser"], "Firefox");
    assert_eq!(first["is_authenticated"], false);
    assert!(first["country"].is_null());
}

#[tokio::test]
async fn test_authenticated_visitor_uses_user_id() {
    let app = setup();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/sites/{SITE}/visitors/track"))
        .header("content-type", "application/json")
        .header("user-agent", FIREFOX_UA)
        .body(Body::from(
            json!({ "authenticated_user_id": "acct_42", "referrer": "https://news.example" })
                .to_string(),
        ))
        .expect("build request");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let visitor = json_body(response).await["data"].clone();
    assert_eq!(visitor["is_authenticated"], true);
    assert_eq!(visitor["user_id"], "acct_42");
    assert_eq!(visitor["referrer"], "https://news.example");
}

#[tokio::test]
async fn test_second_page_view_clears_bounce() {
    let app = setup();
    let visitor = track_visitor(&app, "203.0.113.7").await;
    let visitor_id = visitor["id"].as_str().unwrap();
    let session = start_session(&app, visitor_id).await;
    let session_id = session["id"].as_str().unwrap();

    let first = page_view(&app, visitor_id, session_id, "https://example.com/?ref=x").await;
    assert_eq!(first["path"], "/");
    assert_eq!(first["is_bounce"], true);

    let second = page_view(&app, visitor_id, session_id, "https://example.com/pricing").await;
    assert_eq!(second["path"], "/pricing");
    assert_eq!(second["is_bounce"], false);

    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/sessions/{session_id}/end"),
            json!({}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ended = json_body(response).await["data"].clone();
    assert_eq!(ended["is_active"], false);
    assert_eq!(ended["page_view_count"], 2);

    // Ended sessions take no more page views.
    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/pageviews"),
            json!({
                "visitor_id": visitor_id,
                "session_id": session_id,
                "url": "https://example.com/late",
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_page_view_for_unknown_session_is_404() {
    let app = setup();
    let visitor = track_visitor(&app, "203.0.113.7").await;
    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/pageviews"),
            json!({
                "visitor_id": visitor["id"],
                "session_id": "missing",
                "url": "https://example.com/",
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_negative_duration_is_rejected() {
    let app = setup();
    let visitor = track_visitor(&app, "203.0.113.7").await;
    let visitor_id = visitor["id"].as_str().unwrap();
    let session = start_session(&app, visitor_id).await;
    let view = page_view(&app, visitor_id, session["id"].as_str().unwrap(), "/docs").await;

    let request = Request::builder()
        .method("PATCH")
        .uri(format!(
            "/api/sites/{SITE}/pageviews/{}",
            view["id"].as_str().unwrap()
        ))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "duration": -5 }).to_string()))
        .expect("build request");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["field"], "duration");
}

#[tokio::test]
async fn test_summary_reflects_tracked_traffic() {
    let app = setup();
    for ip in ["203.0.113.1", "203.0.113.2"] {
        let visitor = track_visitor(&app, ip).await;
        let visitor_id = visitor["id"].as_str().unwrap();
        let session = start_session(&app, visitor_id).await;
        let session_id = session["id"].as_str().unwrap();
        page_view(&app, visitor_id, session_id, "https://example.com/").await;

        let response = send(
            &app,
            post_json(
                &format!("/api/sites/{SITE}/events"),
                json!({
                    "visitor_id": visitor_id,
                    "session_id": session_id,
                    "event_type": "click",
                    "element_id": "cta",
                    "metadata": { "position": 1 },
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let visitor = track_visitor(&app, "203.0.113.1").await;
    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/conversions"),
            json!({ "visitor_id": visitor["id"], "conversion_type": "signup", "value": 49.5 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, get_as_owner(&format!("/api/sites/{SITE}/summary"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let data = json_body(response).await["data"].clone();
    let summary = &data["summary"];
    assert_eq!(summary["page_metrics"]["total_views"], 2);
    assert_eq!(summary["page_metrics"]["unique_visitors"], 2);
    assert_eq!(summary["visitor_metrics"]["total_visitors"], 2);
    assert_eq!(summary["conversion_metrics"]["total_conversions"], 1);
    assert_eq!(summary["conversion_metrics"]["conversion_rate"], 50.0);
    assert_eq!(summary["engagement"]["total_events"], 2);
    assert!(summary["time_frame"].is_null());

    let points = data["timeseries"].as_array().unwrap();
    let views: i64 = points
        .iter()
        .map(|p| p["total_views"].as_i64().unwrap())
        .sum();
    assert_eq!(views, 2);
}

#[tokio::test]
async fn test_summary_requires_user_header() {
    let app = setup();
    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/sites/{SITE}/summary"))
        .body(Body::empty())
        .expect("build request");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_summary_rejects_bad_granularity() {
    let app = setup();
    let response = send(
        &app,
        get_as_owner(&format!("/api/sites/{SITE}/summary?granularity=yearly")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["field"], "granularity");
}

#[tokio::test]
async fn test_unknown_event_type_is_rejected() {
    let app = setup();
    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/events"),
            json!({ "visitor_id": "v", "session_id": "s", "event_type": "hover" }),
        ),
    )
    .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_visitor_analytics_and_journey() {
    let app = setup();
    let visitor = track_visitor(&app, "203.0.113.9").await;
    let visitor_id = visitor["id"].as_str().unwrap();
    let session = start_session(&app, visitor_id).await;
    let session_id = session["id"].as_str().unwrap();
    page_view(&app, visitor_id, session_id, "https://example.com/").await;
    page_view(&app, visitor_id, session_id, "https://example.com/pricing").await;
    page_view(&app, visitor_id, session_id, "https://example.com/pricing").await;
    let response = send(
        &app,
        post_json(
            &format!("/api/sites/{SITE}/events"),
            json!({ "visitor_id": visitor_id, "session_id": session_id, "event_type": "click" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let other = track_visitor(&app, "203.0.113.10").await;
    let other_session = start_session(&app, other["id"].as_str().unwrap()).await;
    page_view(
        &app,
        other["id"].as_str().unwrap(),
        other_session["id"].as_str().unwrap(),
        "https://example.com/blog",
    )
    .await;

    let response = send(
        &app,
        get_as_owner(&format!("/api/sites/{SITE}/visitors/{visitor_id}/analytics")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let analytics = json_body(response).await["data"].clone();
    assert_eq!(analytics["visitor"]["id"], visitor_id);
    assert_eq!(analytics["total_sessions"], 1);
    assert_eq!(analytics["total_page_views"], 3);
    assert_eq!(analytics["total_events"], 1);
    assert_eq!(analytics["average_pages_per_session"], 3.0);
    assert_eq!(analytics["bounce_rate"], 0.0);
    assert_eq!(analytics["last_session"]["id"], session_id);
    assert_eq!(analytics["top_pages"][0]["path"], "/pricing");
    assert_eq!(analytics["top_pages"][0]["views"], 2);
    assert_eq!(analytics["top_events"][0]["event_type"], "click");

    let response = send(
        &app,
        get_as_owner(&format!("/api/sites/{SITE}/visitors/{visitor_id}/journey")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let journey = json_body(response).await["data"].clone();
    assert_eq!(journey["total_steps"], 3);
    let sessions = journey["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    let paths: Vec<&str> = sessions[0]["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["/", "/pricing", "/pricing"]);
}

#[tokio::test]
async fn test_unknown_visitor_analytics_is_404() {
    let app = setup();
    let response = send(
        &app,
        get_as_owner(&format!("/api/sites/{SITE}/visitors/missing/journey")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/sites/{SITE}/visitors/missing/analytics"))
        .body(Body::empty())
        .expect("build request");
    assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_location_override_replaces_and_clears() {
    let app = setup();
    let visitor = track_visitor(&app, "203.0.113.11").await;
    let visitor_id = visitor["id"].as_str().unwrap();
    let uri = format!("/api/sites/{SITE}/visitors/{visitor_id}/location");

    let request = post_as_owner(&uri, json!({ "country": "DE", "city": "Berlin" }));
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await["data"].clone();
    assert_eq!(updated["country"], "DE");
    assert_eq!(updated["city"], "Berlin");

    let request = post_as_owner(&uri, json!({ "country": "FR", "city": " " }));
    let updated = json_body(send(&app, request).await).await["data"].clone();
    assert_eq!(updated["country"], "FR");
    assert!(updated["city"].is_null());

    // Tracking again does not undo the override.
    let again = track_visitor(&app, "203.0.113.11").await;
    assert_eq!(again["country"], "FR");

    let request = post_as_owner(
        &format!("/api/sites/{SITE}/visitors/missing/location"),
        json!({ "country": "DE" }),
    );
    assert_eq!(send(&app, request).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_summary_rejects_too_many_hourly_buckets() {
    let app = setup();
    let response = send(
        &app,
        get_as_owner(&format!(
            "/api/sites/{SITE}/summary?granularity=hourly\
             &start=2000-01-01T00:00:00Z&end=2024-01-01T00:00:00Z"
        )),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
