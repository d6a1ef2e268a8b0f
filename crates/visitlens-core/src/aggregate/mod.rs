//! Rollups over a [`Snapshot`].
//!
//! Every function in the submodules is a pure reduction over an in-memory
//! snapshot. [`Aggregator`] loads the snapshot for a time frame through the
//! store and runs them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AggregationSettings;
use crate::error::{CoreError, CoreResult};
use crate::event::{EventType, Visitor};
use crate::snapshot::Snapshot;
use crate::store::EventStore;
use crate::timeframe::{Granularity, TimeFrame, TimeRange};

pub mod behavior;
pub mod conversions;
pub mod events;
pub mod pages;
pub mod summary;
pub mod visitor_activity;
pub mod visitors;

pub use behavior::{
    aggregate_user_behavior, behavior_summary, engagement_score, BehaviorSummary, UserBehavior,
};
pub use conversions::{aggregate_conversions, ConversionSummary, ConversionTypeStats};
pub use events::{aggregate_events, EventTypeStats};
pub use pages::{
    aggregate_page_metrics, page_report, page_timeseries, PageMetrics, PageReport,
    TimeseriesPoint, TopPage,
};
pub use summary::{analytics_summary, summary_fields, AnalyticsSummary};
pub use visitor_activity::{
    visitor_analytics, visitor_journey, EventCount, JourneySession, JourneyStep, PageCount,
    VisitorAnalytics, VisitorJourney,
};
pub use visitors::{aggregate_visitor_demographics, DimensionCount, VisitorDemographics};

/// `numerator / denominator * 100`, clamped to `[0, 100]`; 0 when the
/// denominator is 0.
pub fn percentage(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        return 0.0;
    }
    (numerator / denominator * 100.0).clamp(0.0, 100.0)
}

/// Plain division with the same zero-denominator rule as [`percentage`].
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        return 0.0;
    }
    numerator / denominator
}

pub fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

/// Loads snapshots through the store and runs the rollups for a time frame.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn EventStore>,
    settings: AggregationSettings,
}

impl Aggregator {
    pub fn new(store: Arc<dyn EventStore>, settings: AggregationSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    pub async fn snapshot(&self, site_id: &str, range: TimeRange) -> CoreResult<Snapshot> {
        Ok(Snapshot::load(self.store.as_ref(), site_id, range).await?)
    }

    async fn snapshot_for(&self, time_frame: &TimeFrame) -> CoreResult<Snapshot> {
        self.snapshot(&time_frame.site_id, time_frame.range()?).await
    }

    pub async fn page_metrics(
        &self,
        time_frame: &TimeFrame,
    ) -> CoreResult<BTreeMap<String, PageMetrics>> {
        Ok(aggregate_page_metrics(&self.snapshot_for(time_frame).await?))
    }

    pub async fn page_report(&self, time_frame: &TimeFrame) -> CoreResult<PageReport> {
        Ok(page_report(&self.snapshot_for(time_frame).await?))
    }

    pub async fn user_behavior(
        &self,
        time_frame: &TimeFrame,
    ) -> CoreResult<BTreeMap<String, UserBehavior>> {
        let snapshot = self.snapshot_for(time_frame).await?;
        Ok(aggregate_user_behavior(&snapshot, &self.settings.engagement))
    }

    pub async fn conversions(&self, time_frame: &TimeFrame) -> CoreResult<ConversionSummary> {
        Ok(aggregate_conversions(&self.snapshot_for(time_frame).await?))
    }

    pub async fn visitor_demographics(
        &self,
        time_frame: &TimeFrame,
    ) -> CoreResult<VisitorDemographics> {
        Ok(aggregate_visitor_demographics(
            &self.snapshot_for(time_frame).await?,
        ))
    }

    pub async fn events(
        &self,
        time_frame: &TimeFrame,
    ) -> CoreResult<BTreeMap<EventType, EventTypeStats>> {
        Ok(aggregate_events(&self.snapshot_for(time_frame).await?))
    }

    pub async fn summary(&self, time_frame: &TimeFrame) -> CoreResult<AnalyticsSummary> {
        let snapshot = self.snapshot_for(time_frame).await?;
        Ok(analytics_summary(
            &snapshot,
            Some(&time_frame.name),
            &self.settings.engagement,
        ))
    }

    /// Summary for an ad-hoc range that is not backed by a stored time frame.
    pub async fn summary_for_range(
        &self,
        site_id: &str,
        range: TimeRange,
    ) -> CoreResult<AnalyticsSummary> {
        let snapshot = self.snapshot(site_id, range).await?;
        Ok(analytics_summary(&snapshot, None, &self.settings.engagement))
    }

    pub async fn page_timeseries(
        &self,
        site_id: &str,
        range: TimeRange,
        granularity: Granularity,
    ) -> CoreResult<Vec<TimeseriesPoint>> {
        let snapshot = self.snapshot(site_id, range).await?;
        page_timeseries(&snapshot, granularity, self.settings.timezone)
    }

    async fn known_visitor(&self, site_id: &str, visitor_id: &str) -> CoreResult<Visitor> {
        self.store
            .get_visitor(site_id, visitor_id)
            .await?
            .ok_or_else(|| CoreError::not_found("visitor", visitor_id))
    }

    /// Rollup of one visitor's activity in the range. Unknown visitors are
    /// `NotFound`; known visitors without activity get zeroed figures.
    pub async fn visitor_analytics(
        &self,
        site_id: &str,
        visitor_id: &str,
        range: TimeRange,
    ) -> CoreResult<VisitorAnalytics> {
        let visitor = self.known_visitor(site_id, visitor_id).await?;
        let snapshot = self.snapshot(site_id, range).await?;
        Ok(visitor_analytics(&snapshot, &visitor))
    }

    pub async fn visitor_journey(
        &self,
        site_id: &str,
        visitor_id: &str,
        range: TimeRange,
    ) -> CoreResult<VisitorJourney> {
        let visitor = self.known_visitor(site_id, visitor_id).await?;
        let snapshot = self.snapshot(site_id, range).await?;
        Ok(visitor_journey(&snapshot, &visitor.id))
    }
}
