//! Event store abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{
    Conversion, Event, NewVisit, PageView, Session, TenantScope, TrackConversion, TrackEvent,
    TrackPageView, Visitor,
};
use crate::metric::{CreateMetricRequest, Metric};
use crate::report::{CreateReportRequest, GenerationTicket, Report};
use crate::timeframe::{Granularity, TimeFrame, TimeRange};

/// Keyset position inside a timestamp-ordered scan. `seq` is the store's
/// insertion sequence and breaks timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
}

#[derive(Debug, Clone)]
pub struct ScanPage<T> {
    pub rows: Vec<T>,
    /// `None` once the scan is exhausted.
    pub next: Option<ScanCursor>,
}

/// Durable storage for raw tracking data, time frames, reports and metrics.
///
/// Every write is a single atomic step. Domain failures (missing visitor,
/// ended session, stale generation ticket) are returned as a
/// [`crate::error::CoreError`] inside the `anyhow::Error`.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Find-or-create the visitor for this identity and bump `last_visit`.
    async fn track_visitor(&self, visit: &NewVisit, at: DateTime<Utc>) -> anyhow::Result<Visitor>;

    async fn get_visitor(&self, site_id: &str, visitor_id: &str)
        -> anyhow::Result<Option<Visitor>>;

    /// Overwrite the visitor's location. Either field may be cleared.
    async fn update_visitor_location(
        &self,
        site_id: &str,
        visitor_id: &str,
        country: Option<&str>,
        city: Option<&str>,
    ) -> anyhow::Result<Visitor>;

    async fn start_session(
        &self,
        site_id: &str,
        visitor_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Session>;

    async fn end_session(
        &self,
        site_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Session>;

    async fn get_session(&self, site_id: &str, session_id: &str)
        -> anyhow::Result<Option<Session>>;

    async fn record_page_view(
        &self,
        site_id: &str,
        req: &TrackPageView,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PageView>;

    async fn update_page_view_duration(
        &self,
        site_id: &str,
        page_view_id: &str,
        duration: i64,
    ) -> anyhow::Result<PageView>;

    async fn get_page_view(
        &self,
        site_id: &str,
        page_view_id: &str,
    ) -> anyhow::Result<Option<PageView>>;

    async fn record_event(
        &self,
        site_id: &str,
        req: &TrackEvent,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Event>;

    async fn record_conversion(
        &self,
        site_id: &str,
        req: &TrackConversion,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Conversion>;

    async fn scan_page_views(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<PageView>>;

    async fn scan_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Event>>;

    async fn scan_conversions(
        &self,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Conversion>>;

    /// Sessions that started before `range.end` and had not ended before
    /// `range.start`.
    async fn sessions_overlapping(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<Vec<Session>>;

    /// Visitors first seen inside `range` or with any recorded activity in it.
    async fn visitors_in_range(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<Vec<Visitor>>;

    /// `visitor_id -> id of that visitor's first-ever session`, for visitors
    /// with a session overlapping `range`. Looks at full history.
    async fn first_sessions(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> anyhow::Result<HashMap<String, String>>;

    async fn create_time_frame(
        &self,
        scope: &TenantScope,
        name: &str,
        range: &TimeRange,
        granularity: Granularity,
    ) -> anyhow::Result<TimeFrame>;

    async fn get_time_frame(
        &self,
        scope: &TenantScope,
        time_frame_id: &str,
    ) -> anyhow::Result<Option<TimeFrame>>;

    async fn list_time_frames(&self, scope: &TenantScope) -> anyhow::Result<Vec<TimeFrame>>;

    async fn create_report(
        &self,
        scope: &TenantScope,
        req: &CreateReportRequest,
    ) -> anyhow::Result<Report>;

    async fn get_report(
        &self,
        scope: &TenantScope,
        report_id: &str,
    ) -> anyhow::Result<Option<Report>>;

    async fn list_reports(&self, scope: &TenantScope) -> anyhow::Result<Vec<Report>>;

    /// Move the report to `generating` and hand out a ticket carrying the new
    /// version. Only the holder of the latest ticket can commit.
    async fn begin_generation(
        &self,
        scope: &TenantScope,
        report_id: &str,
    ) -> anyhow::Result<GenerationTicket>;

    /// Atomically store `data`, `last_generated` and status `generated`.
    /// Fails with `ConcurrencyConflict` if another generation began since
    /// `ticket` was issued.
    async fn commit_generation(
        &self,
        scope: &TenantScope,
        ticket: &GenerationTicket,
        data: &serde_json::Value,
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<Report>;

    /// Restore the status the report had before `ticket` was issued. Leaves
    /// `data` and `last_generated` untouched.
    async fn abort_generation(
        &self,
        scope: &TenantScope,
        ticket: &GenerationTicket,
    ) -> anyhow::Result<()>;

    async fn create_metric(
        &self,
        site_id: &str,
        req: &CreateMetricRequest,
    ) -> anyhow::Result<Metric>;

    async fn get_metric(&self, site_id: &str, metric_id: &str) -> anyhow::Result<Option<Metric>>;

    async fn list_metrics(
        &self,
        site_id: &str,
        include_inactive: bool,
    ) -> anyhow::Result<Vec<Metric>>;

    async fn set_metric_active(
        &self,
        site_id: &str,
        metric_id: &str,
        is_active: bool,
    ) -> anyhow::Result<Option<Metric>>;
}

/// Row types that can be read with a keyset range scan.
#[async_trait]
pub trait ScanSource: Sized + Send + 'static {
    async fn fetch(
        store: &dyn EventStore,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Self>>;
}

#[async_trait]
impl ScanSource for PageView {
    async fn fetch(
        store: &dyn EventStore,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Self>> {
        store.scan_page_views(site_id, range, after, limit).await
    }
}

#[async_trait]
impl ScanSource for Event {
    async fn fetch(
        store: &dyn EventStore,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Self>> {
        store.scan_events(site_id, range, after, limit).await
    }
}

#[async_trait]
impl ScanSource for Conversion {
    async fn fetch(
        store: &dyn EventStore,
        site_id: &str,
        range: &TimeRange,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<Self>> {
        store.scan_conversions(site_id, range, after, limit).await
    }
}

pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1_000;

/// Lazy, restartable range scan ordered by `(timestamp, seq)`.
///
/// Each call to [`RangeScan::next_page`] issues one keyset query, so a row is
/// never returned twice across page boundaries and rows that existed when
/// the scan began are never skipped.
pub struct RangeScan<'a, T: ScanSource> {
    store: &'a dyn EventStore,
    site_id: String,
    range: TimeRange,
    page_size: usize,
    cursor: Option<ScanCursor>,
    done: bool,
    _rows: std::marker::PhantomData<T>,
}

impl<'a, T: ScanSource> RangeScan<'a, T> {
    pub fn new(store: &'a dyn EventStore, site_id: &str, range: TimeRange) -> Self {
        Self {
            store,
            site_id: site_id.to_string(),
            range,
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            cursor: None,
            done: false,
            _rows: std::marker::PhantomData,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch the next page, or `None` once the scan is exhausted.
    pub async fn next_page(&mut self) -> anyhow::Result<Option<Vec<T>>> {
        if self.done {
            return Ok(None);
        }
        let page = T::fetch(
            self.store,
            &self.site_id,
            &self.range,
            self.cursor.as_ref(),
            self.page_size,
        )
        .await?;
        match page.next {
            Some(next) => self.cursor = Some(next),
            None => self.done = true,
        }
        if page.rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(page.rows))
    }

    /// Rewind to the beginning of the range.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }

    pub async fn collect_all(mut self) -> anyhow::Result<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        Ok(rows)
    }
}
