use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::behavior::{behavior_summary, BehaviorSummary};
use super::conversions::aggregate_conversions;
use super::pages::page_totals;
use super::visitors::aggregate_visitor_demographics;
use crate::config::EngagementWeights;
use crate::formula::{Field, FieldSet};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorSummary {
    pub total_visitors: i64,
    pub new_visitors: i64,
    pub returning_visitors: i64,
    pub authenticated_visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub total_views: i64,
    pub unique_pages: i64,
    pub unique_visitors: i64,
    pub avg_time_on_page: f64,
    pub bounce_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionTotals {
    pub total_conversions: i64,
    pub conversion_value: f64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSummary {
    #[serde(flatten)]
    pub behavior: BehaviorSummary,
    pub total_events: i64,
}

/// Dashboard payload for one range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    /// Name of the time frame, when the summary was computed for one.
    pub time_frame: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub visitor_metrics: VisitorSummary,
    pub page_metrics: PageSummary,
    pub conversion_metrics: ConversionTotals,
    pub engagement: EngagementSummary,
}

impl AnalyticsSummary {
    /// Flatten into the inputs a metric formula can reference.
    pub fn fields(&self) -> FieldSet {
        let v = &self.visitor_metrics;
        let p = &self.page_metrics;
        let c = &self.conversion_metrics;
        let e = &self.engagement;
        FieldSet::from([
            (Field::TotalViews, p.total_views as f64),
            (Field::UniqueVisitors, p.unique_visitors as f64),
            (Field::AvgTimeOnPage, p.avg_time_on_page),
            (Field::BounceRate, p.bounce_rate),
            (Field::ConversionRate, c.conversion_rate),
            (Field::UniquePages, p.unique_pages as f64),
            (Field::TotalVisitors, v.total_visitors as f64),
            (Field::NewVisitors, v.new_visitors as f64),
            (Field::ReturningVisitors, v.returning_visitors as f64),
            (Field::AuthenticatedVisitors, v.authenticated_visitors as f64),
            (Field::TotalConversions, c.total_conversions as f64),
            (Field::ConversionValue, c.conversion_value),
            (Field::TotalEvents, e.total_events as f64),
            (Field::TotalSessions, e.behavior.total_sessions as f64),
            (Field::AvgSessionDuration, e.behavior.avg_session_duration),
            (Field::PagesPerSession, e.behavior.pages_per_session),
            (Field::ReturnRate, e.behavior.return_rate),
            (Field::EngagementScore, e.behavior.engagement_score),
        ])
    }
}

pub fn analytics_summary(
    snapshot: &Snapshot,
    time_frame: Option<&str>,
    weights: &EngagementWeights,
) -> AnalyticsSummary {
    let demographics = aggregate_visitor_demographics(snapshot);
    let pages = page_totals(&snapshot.page_views);
    let unique_pages = snapshot
        .page_views
        .iter()
        .map(|pv| pv.path.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len() as i64;
    let conversions = aggregate_conversions(snapshot);

    AnalyticsSummary {
        time_frame: time_frame.map(str::to_string),
        start: snapshot.range.start,
        end: snapshot.range.end,
        visitor_metrics: VisitorSummary {
            total_visitors: demographics.total,
            new_visitors: demographics.new,
            returning_visitors: demographics.returning,
            authenticated_visitors: demographics.authenticated,
        },
        page_metrics: PageSummary {
            total_views: pages.total_views,
            unique_pages,
            unique_visitors: pages.unique_visitors,
            avg_time_on_page: pages.avg_time_on_page,
            bounce_rate: pages.bounce_rate,
        },
        conversion_metrics: ConversionTotals {
            total_conversions: conversions.total_conversions,
            conversion_value: conversions.total_value,
            conversion_rate: conversions.conversion_rate,
        },
        engagement: EngagementSummary {
            behavior: behavior_summary(snapshot, weights),
            total_events: snapshot.events.len() as i64,
        },
    }
}

/// Formula inputs for a whole range.
pub fn summary_fields(snapshot: &Snapshot, weights: &EngagementWeights) -> FieldSet {
    analytics_summary(snapshot, None, weights).fields()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testing::{conversion, page_view, range, session, ts, visitor};

    #[test]
    fn every_field_is_populated() {
        let fields = summary_fields(&Snapshot::empty(range(0, 24)), &EngagementWeights::default());
        for field in Field::ALL {
            assert_eq!(fields.get(&field), Some(&0.0), "{field}");
        }
    }

    #[test]
    fn summary_combines_rollups() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.visitors = vec![visitor("v1", ts(1)), visitor("v2", ts(2))];
        snapshot.sessions = vec![
            session("s1", "v1", ts(1), Some(ts(2)), 2),
            session("s2", "v2", ts(2), None, 1),
        ];
        snapshot.page_views = vec![
            page_view("pv1", "s1", "v1", "/", Some(30), false, ts(1)),
            page_view("pv2", "s1", "v1", "/pricing", None, false, ts(1)),
            page_view("pv3", "s2", "v2", "/", None, true, ts(2)),
        ];
        snapshot.conversions = vec![conversion("c1", "v1", "signup", 9.0, ts(2))];

        let summary = analytics_summary(&snapshot, Some("Launch day"), &EngagementWeights::default());
        assert_eq!(summary.time_frame.as_deref(), Some("Launch day"));
        assert_eq!(summary.visitor_metrics.total_visitors, 2);
        assert_eq!(summary.visitor_metrics.new_visitors, 2);
        assert_eq!(summary.page_metrics.total_views, 3);
        assert_eq!(summary.page_metrics.unique_pages, 2);
        assert!((summary.page_metrics.bounce_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.conversion_metrics.conversion_rate, 50.0);
        assert_eq!(summary.engagement.behavior.total_sessions, 2);
        assert_eq!(summary.engagement.behavior.pages_per_session, 1.5);

        let fields = summary.fields();
        assert_eq!(fields[&Field::ConversionValue], 9.0);
        assert_eq!(fields[&Field::TotalSessions], 2.0);
    }
}
