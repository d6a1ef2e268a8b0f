use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{mean, percentage, ratio};
use crate::event::{EventType, PageView, Session, Visitor};
use crate::snapshot::Snapshot;

const TOP_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCount {
    pub path: String,
    pub views: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCount {
    pub event_type: EventType,
    pub count: i64,
}

/// One visitor's activity inside a range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorAnalytics {
    pub visitor: Visitor,
    pub total_sessions: i64,
    pub total_page_views: i64,
    pub total_events: i64,
    pub total_conversions: i64,
    /// Seconds, over ended sessions only.
    pub average_session_duration: f64,
    pub average_pages_per_session: f64,
    /// Percentage of the visitor's page views flagged as bounces.
    pub bounce_rate: f64,
    /// Conversions per session as a percentage, capped at 100.
    pub conversion_rate: f64,
    /// Latest-starting session overlapping the range.
    pub last_session: Option<Session>,
    pub top_pages: Vec<PageCount>,
    pub top_events: Vec<EventCount>,
}

pub fn visitor_analytics(snapshot: &Snapshot, visitor: &Visitor) -> VisitorAnalytics {
    let id = visitor.id.as_str();
    let sessions: Vec<&Session> = snapshot
        .sessions
        .iter()
        .filter(|s| s.visitor_id == id)
        .collect();
    let page_views: Vec<&PageView> = snapshot
        .page_views
        .iter()
        .filter(|pv| pv.visitor_id == id)
        .collect();
    let total_conversions = snapshot
        .conversions
        .iter()
        .filter(|c| c.visitor_id == id)
        .count() as i64;

    let mut by_path: BTreeMap<&str, i64> = BTreeMap::new();
    for pv in &page_views {
        *by_path.entry(pv.path.as_str()).or_default() += 1;
    }
    let mut top_pages: Vec<PageCount> = by_path
        .into_iter()
        .map(|(path, views)| PageCount {
            path: path.to_string(),
            views,
        })
        .collect();
    top_pages.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.path.cmp(&b.path)));
    top_pages.truncate(TOP_LIMIT);

    let mut by_type: BTreeMap<EventType, i64> = BTreeMap::new();
    let mut total_events = 0_i64;
    for event in snapshot.events.iter().filter(|e| e.visitor_id == id) {
        total_events += 1;
        *by_type.entry(event.event_type).or_default() += 1;
    }
    let mut top_events: Vec<EventCount> = by_type
        .into_iter()
        .map(|(event_type, count)| EventCount { event_type, count })
        .collect();
    // Stable sort keeps the enum order for ties.
    top_events.sort_by(|a, b| b.count.cmp(&a.count));
    top_events.truncate(TOP_LIMIT);

    let durations: Vec<f64> = sessions.iter().filter_map(|s| s.duration_seconds()).collect();
    let bounces = page_views.iter().filter(|pv| pv.is_bounce).count();
    let last_session = sessions
        .iter()
        .max_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)))
        .map(|s| (*s).clone());

    VisitorAnalytics {
        visitor: visitor.clone(),
        total_sessions: sessions.len() as i64,
        total_page_views: page_views.len() as i64,
        total_events,
        total_conversions,
        average_session_duration: mean(&durations),
        average_pages_per_session: ratio(page_views.len() as f64, sessions.len() as f64),
        bounce_rate: percentage(bounces as f64, page_views.len() as f64),
        conversion_rate: percentage(total_conversions as f64, sessions.len() as f64),
        last_session,
        top_pages,
        top_events,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyStep {
    pub page_view_id: String,
    pub path: String,
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneySession {
    pub session_id: String,
    /// `None` when the session row is not part of the snapshot.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub steps: Vec<JourneyStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorJourney {
    pub visitor_id: String,
    pub total_steps: i64,
    pub sessions: Vec<JourneySession>,
}

/// The visitor's page views in timestamp order, grouped by session. Sessions
/// appear in the order of their first page view; sessions without page views
/// in the range are left out.
pub fn visitor_journey(snapshot: &Snapshot, visitor_id: &str) -> VisitorJourney {
    let mut sessions: Vec<JourneySession> = Vec::new();
    let mut total_steps = 0_i64;
    // Snapshot page views are already in (timestamp, seq) order.
    for pv in snapshot.page_views.iter().filter(|pv| pv.visitor_id == visitor_id) {
        let step = JourneyStep {
            page_view_id: pv.id.clone(),
            path: pv.path.clone(),
            title: pv.title.clone(),
            timestamp: pv.timestamp,
            duration: pv.duration,
        };
        total_steps += 1;
        match sessions.iter_mut().find(|s| s.session_id == pv.session_id) {
            Some(session) => session.steps.push(step),
            None => {
                let row = snapshot.sessions.iter().find(|s| s.id == pv.session_id);
                sessions.push(JourneySession {
                    session_id: pv.session_id.clone(),
                    start_time: row.map(|s| s.start_time),
                    end_time: row.and_then(|s| s.end_time),
                    steps: vec![step],
                });
            }
        }
    }
    VisitorJourney {
        visitor_id: visitor_id.to_string(),
        total_steps,
        sessions,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::aggregate::testing::{conversion, event, page_view, range, session, ts, visitor};

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.visitors = vec![visitor("v1", ts(0)), visitor("v2", ts(0))];
        snapshot.sessions = vec![
            session("s1", "v1", ts(1), Some(ts(2)), 2),
            session("s2", "v1", ts(5), None, 1),
            session("s3", "v2", ts(1), Some(ts(3)), 1),
        ];
        snapshot.page_views = vec![
            page_view("p1", "s1", "v1", "/", Some(10), false, ts(1)),
            page_view("p2", "s3", "v2", "/", Some(10), true, ts(1)),
            page_view("p3", "s1", "v1", "/pricing", Some(20), false, ts(1) + Duration::minutes(5)),
            page_view("p4", "s2", "v1", "/pricing", None, true, ts(5)),
        ];
        snapshot.events = vec![
            event("e1", "s1", "v1", EventType::Click, ts(1)),
            event("e2", "s2", "v1", EventType::Click, ts(5)),
            event("e3", "s2", "v1", EventType::Download, ts(6)),
            event("e4", "s3", "v2", EventType::Scroll, ts(2)),
        ];
        snapshot.conversions = vec![conversion("c1", "v1", "signup", 10.0, ts(6))];
        snapshot
    }

    #[test]
    fn analytics_only_count_the_visitors_own_activity() {
        let snapshot = snapshot();
        let v1 = visitor("v1", ts(0));
        let analytics = visitor_analytics(&snapshot, &v1);
        assert_eq!(analytics.total_sessions, 2);
        assert_eq!(analytics.total_page_views, 3);
        assert_eq!(analytics.total_events, 3);
        assert_eq!(analytics.total_conversions, 1);
        assert_eq!(analytics.average_session_duration, 3600.0);
        assert_eq!(analytics.average_pages_per_session, 1.5);
        assert!((analytics.bounce_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(analytics.conversion_rate, 50.0);
        assert_eq!(analytics.last_session.as_ref().map(|s| s.id.as_str()), Some("s2"));
        assert_eq!(
            analytics.top_pages,
            vec![
                PageCount { path: "/pricing".into(), views: 2 },
                PageCount { path: "/".into(), views: 1 },
            ]
        );
        assert_eq!(analytics.top_events[0], EventCount { event_type: EventType::Click, count: 2 });
        assert_eq!(analytics.top_events.len(), 2);
    }

    #[test]
    fn inactive_visitor_has_zeroed_analytics() {
        let analytics = visitor_analytics(&snapshot(), &visitor("v9", ts(0)));
        assert_eq!(analytics.total_sessions, 0);
        assert_eq!(analytics.average_pages_per_session, 0.0);
        assert_eq!(analytics.bounce_rate, 0.0);
        assert_eq!(analytics.conversion_rate, 0.0);
        assert!(analytics.last_session.is_none());
        assert!(analytics.top_pages.is_empty());
    }

    #[test]
    fn journey_groups_ordered_steps_by_session() {
        let journey = visitor_journey(&snapshot(), "v1");
        assert_eq!(journey.total_steps, 3);
        let ids: Vec<&str> = journey.sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        let paths: Vec<&str> = journey.sessions[0].steps.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/pricing"]);
        assert_eq!(journey.sessions[0].end_time, Some(ts(2)));
        assert_eq!(journey.sessions[1].end_time, None);
    }

    #[test]
    fn journey_keeps_steps_whose_session_is_outside_the_snapshot() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.page_views = vec![page_view("p1", "gone", "v1", "/", None, true, ts(3))];
        let journey = visitor_journey(&snapshot, "v1");
        assert_eq!(journey.sessions.len(), 1);
        assert_eq!(journey.sessions[0].start_time, None);
        assert_eq!(journey.sessions[0].steps[0].page_view_id, "p1");
    }
}
