use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::{mean, percentage};
use crate::error::CoreResult;
use crate::event::PageView;
use crate::formula::{Field, FieldSet};
use crate::snapshot::Snapshot;
use crate::timeframe::{resolve_buckets, Granularity};

const TOP_PAGES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    /// Most recent non-empty title seen for the path.
    pub title: Option<String>,
    pub total_views: i64,
    pub unique_visitors: i64,
    /// Seconds; rows without a duration are left out of the mean.
    pub avg_time_on_page: f64,
    pub bounce_rate: f64,
    pub conversion_rate: f64,
}

impl PageMetrics {
    pub fn fields(&self) -> FieldSet {
        FieldSet::from([
            (Field::TotalViews, self.total_views as f64),
            (Field::UniqueVisitors, self.unique_visitors as f64),
            (Field::AvgTimeOnPage, self.avg_time_on_page),
            (Field::BounceRate, self.bounce_rate),
            (Field::ConversionRate, self.conversion_rate),
        ])
    }
}

/// View counts, reach, time on page and bounce rate for a set of page views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PageTotals {
    pub total_views: i64,
    pub unique_visitors: i64,
    pub avg_time_on_page: f64,
    pub bounce_rate: f64,
}

pub(crate) fn page_totals<'a, I>(page_views: I) -> PageTotals
where
    I: IntoIterator<Item = &'a PageView>,
{
    let mut total_views = 0_i64;
    let mut bounces = 0_i64;
    let mut visitors: BTreeSet<&str> = BTreeSet::new();
    let mut durations: Vec<f64> = Vec::new();
    for pv in page_views {
        total_views += 1;
        if pv.is_bounce {
            bounces += 1;
        }
        visitors.insert(pv.visitor_id.as_str());
        if let Some(d) = pv.duration {
            durations.push(d as f64);
        }
    }
    PageTotals {
        total_views,
        unique_visitors: visitors.len() as i64,
        avg_time_on_page: mean(&durations),
        bounce_rate: percentage(bounces as f64, total_views as f64),
    }
}

/// Per-path rollup of the page views inside the snapshot's range.
pub fn aggregate_page_metrics(snapshot: &Snapshot) -> BTreeMap<String, PageMetrics> {
    let mut by_path: BTreeMap<&str, Vec<&PageView>> = BTreeMap::new();
    for pv in &snapshot.page_views {
        by_path.entry(pv.path.as_str()).or_default().push(pv);
    }

    let mut conversions_by_visitor: HashMap<&str, i64> = HashMap::new();
    for conversion in &snapshot.conversions {
        *conversions_by_visitor
            .entry(conversion.visitor_id.as_str())
            .or_default() += 1;
    }

    by_path
        .into_iter()
        .map(|(path, views)| {
            let totals = page_totals(views.iter().copied());
            let viewers: BTreeSet<&str> = views.iter().map(|pv| pv.visitor_id.as_str()).collect();
            let conversions: i64 = viewers
                .iter()
                .map(|v| conversions_by_visitor.get(v).copied().unwrap_or(0))
                .sum();
            let title = views
                .iter()
                .rev()
                .find_map(|pv| pv.title.clone().filter(|t| !t.is_empty()));
            (
                path.to_string(),
                PageMetrics {
                    title,
                    total_views: totals.total_views,
                    unique_visitors: totals.unique_visitors,
                    avg_time_on_page: totals.avg_time_on_page,
                    bounce_rate: totals.bounce_rate,
                    conversion_rate: percentage(conversions as f64, totals.unique_visitors as f64),
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPage {
    pub path: String,
    pub title: Option<String>,
    pub views: i64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub total_page_views: i64,
    pub unique_pages: i64,
    pub unique_visitors: i64,
    pub average_time_on_page: f64,
    pub bounce_rate: f64,
    pub top_pages: Vec<TopPage>,
    pub pages: BTreeMap<String, PageMetrics>,
}

/// Site-wide page totals plus the per-path breakdown and the ten most
/// viewed paths (ties broken by path).
pub fn page_report(snapshot: &Snapshot) -> PageReport {
    let totals = page_totals(&snapshot.page_views);
    let pages = aggregate_page_metrics(snapshot);

    let mut top_pages: Vec<TopPage> = pages
        .iter()
        .map(|(path, m)| TopPage {
            path: path.clone(),
            title: m.title.clone(),
            views: m.total_views,
            avg_duration: m.avg_time_on_page,
        })
        .collect();
    top_pages.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.path.cmp(&b.path)));
    top_pages.truncate(TOP_PAGES_LIMIT);

    PageReport {
        total_page_views: totals.total_views,
        unique_pages: pages.len() as i64,
        unique_visitors: totals.unique_visitors,
        average_time_on_page: totals.avg_time_on_page,
        bounce_rate: totals.bounce_rate,
        top_pages,
        pages,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub period: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_views: i64,
    pub unique_visitors: i64,
    pub avg_time_on_page: f64,
    pub bounce_rate: f64,
}

/// Page totals per resolver bucket. Empty buckets are emitted with zeros so
/// the series is gap-free. Page views are assigned to buckets in one pass
/// over the timestamp-sorted rows.
pub fn page_timeseries(
    snapshot: &Snapshot,
    granularity: Granularity,
    tz: Tz,
) -> CoreResult<Vec<TimeseriesPoint>> {
    let buckets = resolve_buckets(granularity, &snapshot.range, tz)?;
    let mut views: Vec<&PageView> = snapshot
        .page_views
        .iter()
        .filter(|pv| snapshot.range.contains(pv.timestamp))
        .collect();
    views.sort_by_key(|pv| pv.timestamp);

    let mut rest = views.as_slice();
    let mut points = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let split = rest.partition_point(|pv| pv.timestamp < bucket.end);
        let (inside, after) = rest.split_at(split);
        rest = after;
        let totals = page_totals(inside.iter().copied());
        points.push(TimeseriesPoint {
            period: bucket.period,
            start: bucket.start,
            end: bucket.end,
            total_views: totals.total_views,
            unique_visitors: totals.unique_visitors,
            avg_time_on_page: totals.avg_time_on_page,
            bounce_rate: totals.bounce_rate,
        });
    }
    Ok(points)
}
