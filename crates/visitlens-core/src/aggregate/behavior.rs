use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{mean, percentage};
use crate::config::EngagementWeights;
use crate::event::Session;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehavior {
    pub sessions: i64,
    /// Mean over ended sessions only.
    pub avg_session_duration: f64,
    pub pages_per_session: f64,
    /// Percentage of sessions that are not the visitor's first-ever session.
    pub return_rate: f64,
    pub engagement_score: f64,
}

fn normalize(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}

/// Weighted composite in `[0, 100]`. `return_rate` is a percentage.
pub fn engagement_score(
    weights: &EngagementWeights,
    pages_per_session: f64,
    avg_session_duration: f64,
    return_rate: f64,
) -> f64 {
    let total = weights.page_weight + weights.duration_weight + weights.return_weight;
    if total <= 0.0 {
        return 0.0;
    }
    let raw = weights.page_weight * normalize(pages_per_session, weights.pages_normalization_cap)
        + weights.duration_weight
            * normalize(avg_session_duration, weights.duration_normalization_cap_seconds)
        + weights.return_weight * (return_rate / 100.0).clamp(0.0, 1.0);
    (100.0 * raw / total).clamp(0.0, 100.0)
}

fn behavior_of(
    sessions: &[&Session],
    snapshot: &Snapshot,
    weights: &EngagementWeights,
) -> UserBehavior {
    let durations: Vec<f64> = sessions.iter().filter_map(|s| s.duration_seconds()).collect();
    let page_counts: Vec<f64> = sessions.iter().map(|s| s.page_view_count as f64).collect();
    let returning = sessions
        .iter()
        .filter(|s| {
            snapshot
                .first_sessions
                .get(&s.visitor_id)
                .map_or(false, |first| first != &s.id)
        })
        .count();

    let avg_session_duration = mean(&durations);
    let pages_per_session = mean(&page_counts);
    let return_rate = percentage(returning as f64, sessions.len() as f64);
    UserBehavior {
        sessions: sessions.len() as i64,
        avg_session_duration,
        pages_per_session,
        return_rate,
        engagement_score: engagement_score(weights, pages_per_session, avg_session_duration, return_rate),
    }
}

/// Per-visitor session behavior over the sessions overlapping the range.
pub fn aggregate_user_behavior(
    snapshot: &Snapshot,
    weights: &EngagementWeights,
) -> BTreeMap<String, UserBehavior> {
    let mut by_visitor: BTreeMap<&str, Vec<&Session>> = BTreeMap::new();
    for session in &snapshot.sessions {
        by_visitor
            .entry(session.visitor_id.as_str())
            .or_default()
            .push(session);
    }
    by_visitor
        .into_iter()
        .map(|(visitor_id, sessions)| {
            (visitor_id.to_string(), behavior_of(&sessions, snapshot, weights))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSummary {
    pub total_sessions: i64,
    pub avg_session_duration: f64,
    pub pages_per_session: f64,
    pub return_rate: f64,
    /// Mean of the per-visitor scores.
    pub engagement_score: f64,
}

pub fn behavior_summary(snapshot: &Snapshot, weights: &EngagementWeights) -> BehaviorSummary {
    let all: Vec<&Session> = snapshot.sessions.iter().collect();
    let overall = behavior_of(&all, snapshot, weights);
    let scores: Vec<f64> = aggregate_user_behavior(snapshot, weights)
        .values()
        .map(|b| b.engagement_score)
        .collect();
    BehaviorSummary {
        total_sessions: overall.sessions,
        avg_session_duration: overall.avg_session_duration,
        pages_per_session: overall.pages_per_session,
        return_rate: overall.return_rate,
        engagement_score: mean(&scores),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testing::{range, session, ts};

    #[test]
    fn open_sessions_are_excluded_from_duration() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.sessions = vec![
            session("s1", "v1", ts(1), Some(ts(2)), 3),
            session("s2", "v1", ts(3), None, 1),
        ];
        snapshot.first_sessions.insert("v1".into(), "s1".into());
        let behavior = aggregate_user_behavior(&snapshot, &EngagementWeights::default());
        let v1 = &behavior["v1"];
        assert_eq!(v1.sessions, 2);
        assert_eq!(v1.avg_session_duration, 3600.0);
        assert_eq!(v1.pages_per_session, 2.0);
        assert_eq!(v1.return_rate, 50.0);
    }

    #[test]
    fn return_rate_uses_full_history_first_session() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.sessions = vec![session("s9", "v1", ts(1), None, 1)];
        // first-ever session happened before the range
        snapshot.first_sessions.insert("v1".into(), "s0".into());
        let behavior = aggregate_user_behavior(&snapshot, &EngagementWeights::default());
        assert_eq!(behavior["v1"].return_rate, 100.0);
    }

    #[test]
    fn engagement_is_capped_and_weighted() {
        let weights = EngagementWeights::default();
        assert_eq!(engagement_score(&weights, 50.0, 10_000.0, 100.0), 100.0);
        assert_eq!(engagement_score(&weights, 0.0, 0.0, 0.0), 0.0);
        let half_pages = engagement_score(&weights, 5.0, 0.0, 0.0);
        assert!((half_pages - 20.0).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_score_zero() {
        let weights = EngagementWeights {
            page_weight: 0.0,
            duration_weight: 0.0,
            return_weight: 0.0,
            ..EngagementWeights::default()
        };
        assert_eq!(engagement_score(&weights, 10.0, 1800.0, 100.0), 0.0);
    }

    #[test]
    fn empty_snapshot_summary_is_zero() {
        let summary = behavior_summary(&Snapshot::empty(range(0, 24)), &EngagementWeights::default());
        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.return_rate, 0.0);
        assert_eq!(summary.engagement_score, 0.0);
    }
}
