//! Bounce classification.
//!
//! The store re-runs [`BouncePolicy::classify_session`] for a whole session
//! whenever that session gains a page view, a page view's duration changes,
//! or the session ends. The stored `is_bounce` flag is therefore always the
//! policy applied to the session's current contents, and the aggregator reads
//! it as-is.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BouncePolicy {
    /// A lone page view with `duration < threshold_seconds` still counts as a
    /// bounce. The default of 0 means only page views with no reported
    /// duration qualify.
    pub threshold_seconds: i64,
}

impl BouncePolicy {
    pub fn new(threshold_seconds: i64) -> Self {
        Self {
            threshold_seconds: threshold_seconds.max(0),
        }
    }

    pub fn is_bounce(&self, session_page_views: usize, duration: Option<i64>) -> bool {
        session_page_views == 1 && duration.map_or(true, |d| d < self.threshold_seconds)
    }

    /// Classify every page view of one session, given as `(id, duration)`.
    pub fn classify_session<'a>(
        &self,
        page_views: &'a [(String, Option<i64>)],
    ) -> Vec<(&'a str, bool)> {
        let count = page_views.len();
        page_views
            .iter()
            .map(|(id, duration)| (id.as_str(), self.is_bounce(count, *duration)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_page_view_without_duration_bounces() {
        let policy = BouncePolicy::default();
        let views = vec![("pv1".to_string(), None)];
        assert_eq!(policy.classify_session(&views), vec![("pv1", true)]);
    }

    #[test]
    fn second_page_view_unbounces_the_first() {
        let policy = BouncePolicy::default();
        let views = vec![("pv1".to_string(), None), ("pv2".to_string(), None)];
        assert_eq!(
            policy.classify_session(&views),
            vec![("pv1", false), ("pv2", false)]
        );
    }

    #[test]
    fn threshold_applies_only_to_lone_page_views() {
        let policy = BouncePolicy::new(10);
        assert!(policy.is_bounce(1, Some(4)));
        assert!(!policy.is_bounce(1, Some(10)));
        assert!(!policy.is_bounce(2, Some(4)));
        assert!(!BouncePolicy::default().is_bounce(1, Some(0)));
    }

    #[test]
    fn negative_threshold_is_clamped() {
        assert_eq!(BouncePolicy::new(-5).threshold_seconds, 0);
    }
}
