use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::event::{Conversion, Event, PageView, Session, Visitor};
use crate::store::{EventStore, RangeScan};
use crate::timeframe::TimeRange;

/// Everything the aggregator reads for one site and one range, loaded up front
/// so every rollup is a pure in-memory reduction.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub range: TimeRange,
    /// Visitors first seen in the range or active in it.
    pub visitors: Vec<Visitor>,
    /// Sessions overlapping the range.
    pub sessions: Vec<Session>,
    /// Page views with `timestamp` in the range, ordered by `(timestamp, seq)`.
    pub page_views: Vec<PageView>,
    pub events: Vec<Event>,
    pub conversions: Vec<Conversion>,
    /// `visitor_id -> first-ever session id`, from full history.
    pub first_sessions: HashMap<String, String>,
}

impl Snapshot {
    pub fn empty(range: TimeRange) -> Self {
        Self {
            range,
            visitors: Vec::new(),
            sessions: Vec::new(),
            page_views: Vec::new(),
            events: Vec::new(),
            conversions: Vec::new(),
            first_sessions: HashMap::new(),
        }
    }

    pub async fn load(
        store: &dyn EventStore,
        site_id: &str,
        range: TimeRange,
    ) -> anyhow::Result<Self> {
        let page_views = RangeScan::<PageView>::new(store, site_id, range)
            .collect_all()
            .await?;
        let events = RangeScan::<Event>::new(store, site_id, range)
            .collect_all()
            .await?;
        let conversions = RangeScan::<Conversion>::new(store, site_id, range)
            .collect_all()
            .await?;
        let sessions = store.sessions_overlapping(site_id, &range).await?;
        let visitors = store.visitors_in_range(site_id, &range).await?;
        let first_sessions = store.first_sessions(site_id, &range).await?;

        debug!(
            site_id,
            page_views = page_views.len(),
            events = events.len(),
            conversions = conversions.len(),
            sessions = sessions.len(),
            visitors = visitors.len(),
            "Snapshot loaded"
        );

        Ok(Self {
            range,
            visitors,
            sessions,
            page_views,
            events,
            conversions,
            first_sessions,
        })
    }

    /// Distinct visitors with any activity inside the range: a page view,
    /// an event, a conversion, or a session overlapping it.
    pub fn active_visitor_ids(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = BTreeSet::new();
        ids.extend(self.page_views.iter().map(|pv| pv.visitor_id.as_str()));
        ids.extend(self.events.iter().map(|e| e.visitor_id.as_str()));
        ids.extend(self.conversions.iter().map(|c| c.visitor_id.as_str()));
        ids.extend(self.sessions.iter().map(|s| s.visitor_id.as_str()));
        ids
    }
}
