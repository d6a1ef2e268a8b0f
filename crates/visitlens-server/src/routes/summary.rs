use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use visitlens_core::aggregate::{analytics_summary, page_timeseries};
use visitlens_core::timeframe::{check_bucket_limit, Granularity, TimeRange};

use crate::{error::AppError, routes::owner_scope, state::AppState};

const DEFAULT_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub granularity: Option<String>,
}

impl RangeQuery {
    /// Missing bounds default to the last 30 days ending now.
    pub(crate) fn range(&self, now: DateTime<Utc>) -> Result<TimeRange, AppError> {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or(end - Duration::days(DEFAULT_LOOKBACK_DAYS));
        Ok(TimeRange::new(start, end)?)
    }

    /// Ranges that would produce too many buckets are rejected before
    /// anything loads.
    fn resolve(&self, now: DateTime<Utc>) -> Result<(TimeRange, Granularity), AppError> {
        let range = self.range(now)?;
        let granularity = match self.granularity.as_deref() {
            Some(raw) => raw.parse::<Granularity>()?,
            None => Granularity::Daily,
        };
        check_bucket_limit(granularity, &range)?;
        Ok((range, granularity))
    }
}

/// `GET /api/sites/{site_id}/summary`
///
/// Ad-hoc summary plus page timeseries over one snapshot, without a stored
/// time frame.
#[tracing::instrument(skip(state, headers))]
pub async fn site_summary(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let (range, granularity) = query.resolve(Utc::now())?;
    let aggregator = state.aggregator();
    let settings = aggregator.settings();
    let snapshot = aggregator.snapshot(&scope.site_id, range).await?;
    let summary = analytics_summary(&snapshot, None, &settings.engagement);
    let timeseries = page_timeseries(&snapshot, granularity, settings.timezone)?;
    Ok(Json(json!({
        "data": {
            "summary": summary,
            "timeseries": timeseries,
        }
    })))
}

/// `GET /api/sites/{site_id}/pages/timeseries`
#[tracing::instrument(skip(state, headers))]
pub async fn pages_timeseries(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let scope = owner_scope(&headers, &site_id)?;
    let (range, granularity) = query.resolve(Utc::now())?;
    let points = state
        .aggregator()
        .page_timeseries(&scope.site_id, range, granularity)
        .await?;
    Ok(Json(json!({ "data": points })))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn missing_bounds_default_to_last_thirty_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let query = RangeQuery {
            start: None,
            end: None,
            granularity: None,
        };
        let (range, granularity) = query.resolve(now).unwrap();
        assert_eq!(range.end, now);
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(granularity, Granularity::Daily);
    }

    #[test]
    fn inverted_range_and_unknown_granularity_are_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let inverted = RangeQuery {
            start: Some(now),
            end: Some(now - Duration::hours(1)),
            granularity: None,
        };
        assert!(inverted.resolve(now).is_err());
        let bad = RangeQuery {
            start: None,
            end: None,
            granularity: Some("fortnightly".to_string()),
        };
        assert!(bad.resolve(now).is_err());
    }

    #[test]
    fn unbounded_hourly_range_is_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let query = RangeQuery {
            start: Some(Utc.with_ymd_and_hms(1000, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).unwrap()),
            granularity: Some("hourly".to_string()),
        };
        assert!(matches!(
            query.resolve(now),
            Err(AppError::BadRequest { .. })
        ));
    }
}
