use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ratio;
use crate::event::EventType;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTypeStats {
    pub total_events: i64,
    pub unique_visitors: i64,
    /// Events of this type divided by all sessions overlapping the range.
    pub average_per_session: f64,
}

pub fn aggregate_events(snapshot: &Snapshot) -> BTreeMap<EventType, EventTypeStats> {
    let mut grouped: BTreeMap<EventType, (i64, BTreeSet<&str>)> = BTreeMap::new();
    for event in &snapshot.events {
        let (count, visitors) = grouped.entry(event.event_type).or_default();
        *count += 1;
        visitors.insert(event.visitor_id.as_str());
    }
    let sessions = snapshot.sessions.len() as f64;
    grouped
        .into_iter()
        .map(|(event_type, (count, visitors))| {
            (
                event_type,
                EventTypeStats {
                    total_events: count,
                    unique_visitors: visitors.len() as i64,
                    average_per_session: ratio(count as f64, sessions),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testing::{event, range, session, ts};

    #[test]
    fn groups_by_type_and_divides_by_sessions() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.sessions = vec![
            session("s1", "v1", ts(1), None, 1),
            session("s2", "v2", ts(1), None, 1),
        ];
        snapshot.events = vec![
            event("e1", "s1", "v1", EventType::Click, ts(1)),
            event("e2", "s1", "v1", EventType::Click, ts(2)),
            event("e3", "s2", "v2", EventType::Click, ts(2)),
            event("e4", "s2", "v2", EventType::Download, ts(3)),
        ];
        let stats = aggregate_events(&snapshot);
        assert_eq!(stats[&EventType::Click].total_events, 3);
        assert_eq!(stats[&EventType::Click].unique_visitors, 2);
        assert_eq!(stats[&EventType::Click].average_per_session, 1.5);
        assert_eq!(stats[&EventType::Download].average_per_session, 0.5);
        assert!(!stats.contains_key(&EventType::Scroll));
    }

    #[test]
    fn no_sessions_means_zero_average() {
        let mut snapshot = Snapshot::empty(range(0, 24));
        snapshot.events = vec![event("e1", "s1", "v1", EventType::Custom, ts(1))];
        let stats = aggregate_events(&snapshot);
        assert_eq!(stats[&EventType::Custom].average_per_session, 0.0);
    }
}
