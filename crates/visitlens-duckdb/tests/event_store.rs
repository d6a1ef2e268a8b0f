use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use visitlens_core::aggregate::Aggregator;
use visitlens_core::bounce::BouncePolicy;
use visitlens_core::config::AggregationSettings;
use visitlens_core::error::CoreError;
use visitlens_core::event::{
    EventType, Metadata, MetadataValue, NewVisit, PageView, TenantScope, TrackConversion,
    TrackEvent, TrackPageView,
};
use visitlens_core::store::{EventStore, RangeScan};
use visitlens_core::timeframe::{Granularity, TimeRange};
use visitlens_duckdb::DuckDbBackend;

const SITE: &str = "site_1";

fn ts(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
}

fn range(start_hour: i64, end_hour: i64) -> TimeRange {
    TimeRange::new(ts(start_hour), ts(end_hour)).unwrap()
}

fn visit(ip: &str, user_agent: &str) -> NewVisit {
    NewVisit {
        site_id: SITE.to_string(),
        ip_address: ip.to_string(),
        user_agent: user_agent.to_string(),
        referrer: Some("https://www.google.com/search".to_string()),
        country: Some("PL".to_string()),
        browser: Some("Chrome".to_string()),
        ..NewVisit::default()
    }
}

fn page(visitor_id: &str, session_id: &str, path: &str, duration: Option<i64>) -> TrackPageView {
    TrackPageView {
        visitor_id: visitor_id.to_string(),
        session_id: session_id.to_string(),
        url: format!("https://example.com{path}"),
        path: path.to_string(),
        title: None,
        duration,
    }
}

fn store() -> Arc<dyn EventStore> {
    Arc::new(DuckDbBackend::open_in_memory().expect("db"))
}

fn core_err(err: anyhow::Error) -> CoreError {
    CoreError::from(err)
}

#[tokio::test]
async fn test_same_identity_tracks_one_visitor() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let store: Arc<dyn EventStore> = db.clone();

    let later = store
        .track_visitor(&visit("10.0.0.1", "Mozilla/5.0"), ts(5))
        .await
        .expect("first");
    let mut second_visit = visit("10.0.0.1", "Mozilla/5.0");
    second_visit.city = Some("Warsaw".to_string());
    let earlier = store.track_visitor(&second_visit, ts(1)).await.expect("second");

    assert_eq!(later.id, earlier.id);
    assert_eq!(earlier.first_visit, ts(1));
    assert_eq!(earlier.last_visit, ts(5));
    assert_eq!(earlier.city.as_deref(), Some("Warsaw"));
    assert_eq!(earlier.country.as_deref(), Some("PL"));

    let conn = db.conn_for_test().await;
    let count: i64 = conn
        .prepare("SELECT COUNT(*) FROM visitors WHERE site_id = ?1")
        .unwrap()
        .query_row(visitlens_duckdb::duckdb::params![SITE], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_concurrent_identity_upserts_share_a_row() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let store: Arc<dyn EventStore> = db.clone();

    let mut handles = Vec::new();
    for hour in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .track_visitor(&visit("10.0.0.9", "curl/8"), ts(hour))
                .await
                .map(|v| v.id)
        }));
    }
    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(ids.len(), 1);

    let visitor = store
        .get_visitor(SITE, ids.iter().next().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(visitor.first_visit, ts(0));
    assert_eq!(visitor.last_visit, ts(7));
}

#[tokio::test]
async fn test_authenticated_identity_differs_from_anonymous() {
    let store = store();
    let anonymous = store
        .track_visitor(&visit("10.0.0.1", "Mozilla/5.0"), ts(0))
        .await
        .unwrap();
    let mut signed_in = visit("10.0.0.1", "Mozilla/5.0");
    signed_in.authenticated_user_id = Some("user_42".to_string());
    let authenticated = store.track_visitor(&signed_in, ts(1)).await.unwrap();

    assert_ne!(anonymous.id, authenticated.id);
    assert!(authenticated.is_authenticated);
    assert_eq!(authenticated.user_id.as_deref(), Some("user_42"));
    assert!(!anonymous.is_authenticated);
}

#[tokio::test]
async fn test_second_page_view_unbounces_the_first() {
    let store = store();
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(0))
        .await
        .unwrap();
    let session = store.start_session(SITE, &visitor.id, ts(0)).await.unwrap();

    let first = store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/", None), ts(0))
        .await
        .unwrap();
    assert!(first.is_bounce);

    let second = store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/pricing", None), ts(1))
        .await
        .unwrap();
    assert!(!second.is_bounce);
    let first = store.get_page_view(SITE, &first.id).await.unwrap().unwrap();
    assert!(!first.is_bounce);

    let session = store.get_session(SITE, &session.id).await.unwrap().unwrap();
    assert_eq!(session.page_view_count, 2);
}

#[tokio::test]
async fn test_duration_update_reclassifies_bounce_under_threshold_policy() {
    let store: Arc<dyn EventStore> =
        Arc::new(DuckDbBackend::open_in_memory_with(BouncePolicy::new(10)).expect("db"));
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(0))
        .await
        .unwrap();
    let session = store.start_session(SITE, &visitor.id, ts(0)).await.unwrap();

    let pv = store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/", Some(5)), ts(0))
        .await
        .unwrap();
    assert!(pv.is_bounce);

    let pv = store.update_page_view_duration(SITE, &pv.id, 30).await.unwrap();
    assert_eq!(pv.duration, Some(30));
    assert!(!pv.is_bounce);
}

#[tokio::test]
async fn test_session_lifecycle_rules() {
    let store = store();
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(2))
        .await
        .unwrap();

    let err = store.start_session(SITE, "missing", ts(2)).await.unwrap_err();
    assert!(matches!(core_err(err), CoreError::NotFound { entity: "visitor", .. }));

    let session = store.start_session(SITE, &visitor.id, ts(2)).await.unwrap();
    assert!(session.is_active);

    // Ending before the start clamps to the start.
    let ended = store.end_session(SITE, &session.id, ts(1)).await.unwrap();
    assert!(!ended.is_active);
    assert_eq!(ended.end_time, Some(ts(2)));

    let again = store.end_session(SITE, &session.id, ts(9)).await.unwrap();
    assert_eq!(again.end_time, Some(ts(2)));

    let err = store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/", None), ts(3))
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::Validation(_)));
}

#[tokio::test]
async fn test_write_validation_errors() {
    let store = store();
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(0))
        .await
        .unwrap();
    let session = store.start_session(SITE, &visitor.id, ts(0)).await.unwrap();

    let err = store
        .record_page_view(SITE, &page(&visitor.id, "nope", "/", None), ts(0))
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::NotFound { entity: "session", .. }));

    let err = store
        .record_page_view(SITE, &page("someone_else", &session.id, "/", None), ts(0))
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::Validation(_)));

    let err = store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/", Some(-1)), ts(0))
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::Validation(_)));

    let err = store
        .update_page_view_duration(SITE, "pv_missing", 3)
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::NotFound { .. }));

    let err = store
        .record_conversion(
            SITE,
            &TrackConversion {
                visitor_id: visitor.id.clone(),
                conversion_type: "purchase".to_string(),
                value: f64::NAN,
                metadata: Metadata::new(),
            },
            ts(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(core_err(err), CoreError::Validation(_)));
}

#[tokio::test]
async fn test_events_and_conversions_keep_metadata() {
    let store = store();
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(0))
        .await
        .unwrap();
    let session = store.start_session(SITE, &visitor.id, ts(0)).await.unwrap();

    let mut metadata = Metadata::new();
    metadata.insert("plan".to_string(), MetadataValue::String("pro".to_string()));
    metadata.insert("seats".to_string(), MetadataValue::Number(3.0));

    let event = store
        .record_event(
            SITE,
            &TrackEvent {
                visitor_id: visitor.id.clone(),
                session_id: session.id.clone(),
                event_type: EventType::FormSubmit,
                element_id: Some("signup".to_string()),
                element_class: None,
                element_text: None,
                metadata: metadata.clone(),
            },
            ts(1),
        )
        .await
        .unwrap();
    assert_eq!(event.event_type, EventType::FormSubmit);
    assert_eq!(event.metadata, metadata);

    let conversion = store
        .record_conversion(
            SITE,
            &TrackConversion {
                visitor_id: visitor.id.clone(),
                conversion_type: "purchase".to_string(),
                value: 49.5,
                metadata,
            },
            ts(1),
        )
        .await
        .unwrap();
    assert_eq!(conversion.value, 49.5);
    assert_eq!(conversion.metadata["plan"], MetadataValue::String("pro".into()));
}

#[tokio::test]
async fn test_range_scan_pages_without_duplicates_or_gaps() {
    let store = store();
    let visitor = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(0))
        .await
        .unwrap();
    let session = store.start_session(SITE, &visitor.id, ts(0)).await.unwrap();

    // Groups of three share a timestamp so page boundaries fall inside ties.
    let mut expected = Vec::new();
    for i in 0..25 {
        let pv = store
            .record_page_view(
                SITE,
                &page(&visitor.id, &session.id, &format!("/p{i}"), None),
                ts(i / 3),
            )
            .await
            .unwrap();
        expected.push(pv.id);
    }
    // Outside the range.
    store
        .record_page_view(SITE, &page(&visitor.id, &session.id, "/late", None), ts(48))
        .await
        .unwrap();

    let rows: Vec<PageView> = RangeScan::<PageView>::new(store.as_ref(), SITE, range(0, 24))
        .with_page_size(7)
        .collect_all()
        .await
        .unwrap();
    let ids: Vec<String> = rows.into_iter().map(|pv| pv.id).collect();
    assert_eq!(ids, expected);

    let mut scan = RangeScan::<PageView>::new(store.as_ref(), SITE, range(0, 24)).with_page_size(10);
    let first = scan.next_page().await.unwrap().unwrap();
    assert_eq!(first.len(), 10);
    scan.restart();
    let again = scan.next_page().await.unwrap().unwrap();
    assert_eq!(first[0].id, again[0].id);
}

#[tokio::test]
async fn test_visitors_in_range_include_returning_activity() {
    let store = store();
    let old = store
        .track_visitor(&visit("10.0.0.1", "ua"), ts(-48))
        .await
        .unwrap();
    let idle = store
        .track_visitor(&visit("10.0.0.2", "ua"), ts(-48))
        .await
        .unwrap();
    let fresh = store
        .track_visitor(&visit("10.0.0.3", "ua"), ts(3))
        .await
        .unwrap();
    store.start_session(SITE, &old.id, ts(-48)).await.unwrap();
    store.start_session(SITE, &old.id, ts(2)).await.unwrap();

    let visitors = store.visitors_in_range(SITE, &range(0, 24)).await.unwrap();
    let ids: HashSet<String> = visitors.into_iter().map(|v| v.id).collect();
    assert!(ids.contains(&old.id));
    assert!(ids.contains(&fresh.id));
    assert!(!ids.contains(&idle.id));

    let first = store.first_sessions(SITE, &range(0, 24)).await.unwrap();
    let first_session = store
        .get_session(SITE, &first[&old.id])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_session.start_time, ts(-48));
}

#[tokio::test]
async fn test_session_ending_at_range_start_is_outside_the_range() {
    let store = store();
    let before = store
        .track_visitor(&visit("10.0.2.1", "ua"), ts(-5))
        .await
        .unwrap();
    let edge = store
        .track_visitor(&visit("10.0.2.2", "ua"), ts(-5))
        .await
        .unwrap();
    let ended_early = store.start_session(SITE, &before.id, ts(-5)).await.unwrap();
    store.end_session(SITE, &ended_early.id, ts(0)).await.unwrap();
    let instant = store.start_session(SITE, &edge.id, ts(0)).await.unwrap();
    store.end_session(SITE, &instant.id, ts(0)).await.unwrap();

    let sessions = store.sessions_overlapping(SITE, &range(0, 24)).await.unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![instant.id.as_str()]);

    let visitors = store.visitors_in_range(SITE, &range(0, 24)).await.unwrap();
    let visitor_ids: HashSet<String> = visitors.into_iter().map(|v| v.id).collect();
    assert!(!visitor_ids.contains(&before.id));
    assert!(visitor_ids.contains(&edge.id));

    let first = store.first_sessions(SITE, &range(0, 24)).await.unwrap();
    assert!(!first.contains_key(&before.id));
    assert_eq!(first[&edge.id], instant.id);

    // The earlier range does see the session that ended at its end.
    let earlier = store.sessions_overlapping(SITE, &range(-6, 0)).await.unwrap();
    assert_eq!(earlier.len(), 1);
    assert_eq!(earlier[0].id, ended_early.id);
}

#[tokio::test]
async fn test_aggregator_reads_through_the_store() {
    let store = store();
    let mut visitor_ids = Vec::new();
    for i in 0..4 {
        let visitor = store
            .track_visitor(&visit(&format!("10.0.1.{i}"), "ua"), ts(0))
            .await
            .unwrap();
        let session = store.start_session(SITE, &visitor.id, ts(i)).await.unwrap();
        store
            .record_page_view(SITE, &page(&visitor.id, &session.id, "/", Some(20)), ts(i))
            .await
            .unwrap();
        store
            .record_page_view(SITE, &page(&visitor.id, &session.id, "/docs", Some(40)), ts(i + 1))
            .await
            .unwrap();
        store.end_session(SITE, &session.id, ts(i + 2)).await.unwrap();
        visitor_ids.push(visitor.id);
    }
    store
        .record_conversion(
            SITE,
            &TrackConversion {
                visitor_id: visitor_ids[0].clone(),
                conversion_type: "signup".to_string(),
                value: 0.0,
                metadata: Metadata::new(),
            },
            ts(3),
        )
        .await
        .unwrap();

    let scope = TenantScope::new(SITE, "user_1");
    let time_frame = store
        .create_time_frame(&scope, "Day one", &range(0, 24), Granularity::Daily)
        .await
        .unwrap();
    let aggregator = Aggregator::new(Arc::clone(&store), AggregationSettings::default());

    let conversions = aggregator.conversions(&time_frame).await.unwrap();
    assert_eq!(conversions.total_conversions, 1);
    assert_eq!(conversions.distinct_visitors, 4);
    assert_eq!(conversions.conversion_rate, 25.0);

    let pages = aggregator.page_metrics(&time_frame).await.unwrap();
    assert_eq!(pages["/"].total_views, 4);
    assert_eq!(pages["/"].bounce_rate, 0.0);
    assert_eq!(pages["/docs"].avg_time_on_page, 40.0);

    let hourly = aggregator
        .page_timeseries(SITE, range(0, 24), Granularity::Hourly)
        .await
        .unwrap();
    let daily = aggregator
        .page_timeseries(SITE, range(0, 24), Granularity::Daily)
        .await
        .unwrap();
    assert_eq!(hourly.len(), 24);
    assert_eq!(daily.len(), 1);
    let hourly_total: i64 = hourly.iter().map(|p| p.total_views).sum();
    assert_eq!(hourly_total, daily[0].total_views);
    assert_eq!(daily[0].total_views, 8);

    let behavior = aggregator.user_behavior(&time_frame).await.unwrap();
    assert_eq!(behavior.len(), 4);
    assert_eq!(behavior[&visitor_ids[0]].sessions, 1);
    assert_eq!(behavior[&visitor_ids[0]].pages_per_session, 2.0);
    assert_eq!(behavior[&visitor_ids[0]].avg_session_duration, 7200.0);

    let demographics = aggregator.visitor_demographics(&time_frame).await.unwrap();
    assert_eq!(demographics.total, 4);
    assert_eq!(demographics.new, 4);
    assert_eq!(demographics.returning, 0);

    let summary = aggregator.summary_for_range(SITE, range(0, 24)).await.unwrap();
    assert!(summary.time_frame.is_none());
    assert_eq!(summary.page_metrics.total_views, 8);
    assert_eq!(summary.conversion_metrics.total_conversions, 1);
}
