use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use visitlens_core::event::{
    Conversion, Event, NewVisit, PageView, Session, TenantScope, TrackConversion, TrackEvent,
    TrackPageView, Visitor,
};
use visitlens_core::metric::{CreateMetricRequest, Metric};
use visitlens_core::report::{CreateReportRequest, GenerationTicket, Report};
use visitlens_core::store::{EventStore, ScanCursor, ScanPage};
use visitlens_core::timeframe::{Granularity, TimeFrame, TimeRange};

use crate::queries::{metrics, reports, scans, timeframes};
use crate::DuckDbBackend;

#[async_trait]
impl EventStore for DuckDbBackend {
    async fn track_visitor(&self, visit: &NewVisit, at: DateTime<Utc>) -> anyhow::Result<Visitor> {
        crate::visitor::track_visitor_inner(self, visit, at).await
    }

    async fn get_visitor(
        &self,
        site_id: &str,
        visitor_id: &str,
    ) -> anyhow::Result<Option<Visitor>> {
        crate::visitor::get_visitor_inner(self, site_id, visitor_id).await
    }

    async fn update_visitor_location(
        &self,
        site_id: &str,
        visitor_id: &str,
        country: Option<&str>,
        city: Option<&str>,
    ) -> anyhow::Result<Visitor> {
        crate::visitor::update_visitor_location_inner(self, site_id, visitor_id, country, city)
            .await
    }

    async fn start_session(
        &self,
        site_id: &str,
        visitor_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Session> {
        crate::session::start_session_inner(self, site_id, visitor_id, at).await
    }

    async fn end_session(
        &self,
        site_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Session> {
        crate::session::end_session_inner(self, site_id, session_id, at).await
    }

    async fn get_session(
        &self,
        site_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<Session>> {
        crate::session::get_session_inner(self, site_id, session_id).await
    }

    async fn record_page_view(
        &self,
        site_id: &str,
        req: &TrackPageView,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PageView> {
        crate::pageview::record_page_view_inner(self, site_id, req, at).await
    }

    async fn update_page_view_duration(
        &self,
        site_id: &str,
        page_view_id: &str,
        duration: i64,
    ) -> anyhow::Result<PageView> {
        crate::pageview::update_page_view_duration_inner(self, site_id, page_view_id, duration)
            .await
    }

    async fn get_page_view(
        &self,
        site_id: &str,
        page_view_id: &str,
    ) -> anyhow::Result<Option<PageView>> {
        crate::pageview::get_page_view_inner(self, site_id, page_view_id).await
    }

    async fn record_event(
        &self,
        site_id: &str,
        req: &TrackEvent,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Event> {
        crate::tracking::record_event_inner(self, site_id, req, at).await
    }

    async fn record_conversion(
        &self,
        site_id: &str,
        req: &TrackConversion,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Conversion> {
        crate::tracking::record_conversion_inner(self, site_id, req, at).await
    }

    async fn scan_page_views(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<PageView>> {
        scans::scan_page_views_inner(self, site_id, range, after, limit).await
    }

    async fn scan_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Event>> {
        scans::scan_events_inner(self, site_id, range, after, limit).await
    }

    async fn scan_conversions(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Conversion>> {
        scans::scan_conversions_inner(self, site_id, range, after, limit).await
    }

    async fn sessions_overlapping(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<Vec<Session>> {
        crate::session::sessions_overlapping_inner(self, site_id, range).await
    }

    async fn visitors_in_range(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<Vec<Visitor>> {
        scans::visitors_in_range_inner(self, site_id, range).await
    }

    async fn first_sessions(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<HashMap<String, String>> {
        crate::session::first_sessions_inner(self, site_id, range).await
    }

    async fn create_time_frame(
        &self,
        scope: &TenantScope,
        name: &str,
        range: &TimeRange,
        granularity: Granularity,
    ) -> anyhow::Result<TimeFrame> {
        timeframes::create_time_frame_inner(self, scope, name, range, granularity).await
    }

    async fn get_time_frame(
        &self,
        scope: &TenantScope,
        time_frame_id: &str,
    ) -> anyhow::Result<Option<TimeFrame>> {
        timeframes::get_time_frame_inner(self, scope, time_frame_id).await
    }

    async fn list_time_frames(&self, scope: &TenantScope) -> anyhow::Result<Vec<TimeFrame>> {
        timeframes::list_time_frames_inner(self, scope).await
    }

    async fn create_report(
        &self,
        scope: &TenantScope,
        req: &CreateReportRequest,
    ) -> anyhow::Result<Report> {
        reports::create_report_inner(self, scope, req).await
    }

    async fn get_report(
        &self,
        scope: &TenantScope,
        report_id: &str,
    ) -> anyhow::Result<Option<Report>> {
        reports::get_report_inner(self, scope, report_id).await
    }

    async fn list_reports(&self, scope: &TenantScope) -> anyhow::Result<Vec<Report>> {
        reports::list_reports_inner(self, scope).await
    }

    async fn begin_generation(
        &self,
        scope: &TenantScope,
        report_id: &str,
    ) -> anyhow::Result<GenerationTicket> {
        reports::begin_generation_inner(self, scope, report_id).await
    }

    async fn commit_generation(
        &self,
        scope: &TenantScope,
        ticket: &GenerationTicket,
        data: &serde_json::Value,
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<Report> {
        reports::commit_generation_inner(self, scope, ticket, data, generated_at).await
    }

    async fn abort_generation(
        &self,
        scope: &TenantScope,
        ticket: &GenerationTicket,
    ) -> anyhow::Result<()> {
        reports::abort_generation_inner(self, scope, ticket).await
    }

    async fn create_metric(
        &self,
        site_id: &str,
        req: &CreateMetricRequest,
    ) -> anyhow::Result<Metric> {
        metrics::create_metric_inner(self, site_id, req).await
    }

    async fn get_metric(&self, site_id: &str, metric_id: &str) -> anyhow::Result<Option<Metric>> {
        metrics::get_metric_inner(self, site_id, metric_id).await
    }

    async fn list_metrics(
        &self,
        site_id: &str,
        include_inactive: bool,
    ) -> anyhow::Result<Vec<Metric>> {
        metrics::list_metrics_inner(self, site_id, include_inactive).await
    }

    async fn set_metric_active(
        &self,
        site_id: &str,
        metric_id: &str,
        is_active: bool,
    ) -> anyhow::Result<Option<Metric>> {
        metrics::set_metric_active_inner(self, site_id, metric_id, is_active).await
    }
}
