//! TimeFrame resolution: granularity parsing, truncation, and bucket layout.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Truncate `ts` down to the start of its natural period in `tz`.
    pub fn truncate(&self, ts: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let local = ts.with_timezone(&tz);
        match self {
            // Subtracting the local minute/second keeps the instant's own offset,
            // which sidesteps ambiguous wall-clock hours during DST fall-back.
            Self::Hourly => {
                ts - Duration::seconds(i64::from(local.minute() * 60 + local.second()))
                    - Duration::nanoseconds(i64::from(local.nanosecond()))
            }
            Self::Daily => local_midnight(local.date_naive(), tz),
            Self::Weekly => {
                let date = local.date_naive();
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                local_midnight(monday, tz)
            }
            Self::Monthly => local_midnight(first_of_month(local.date_naive()), tz),
        }
    }

    /// Shortest possible period in seconds, allowing for a DST transition.
    fn min_period_seconds(&self) -> i64 {
        const HOUR: i64 = 3_600;
        match self {
            Self::Hourly => HOUR,
            Self::Daily => 23 * HOUR,
            Self::Weekly => 7 * 24 * HOUR - HOUR,
            Self::Monthly => 28 * 24 * HOUR - HOUR,
        }
    }

    /// The natural boundary that follows `boundary` (which must itself be a
    /// boundary produced by [`Granularity::truncate`]).
    fn next_boundary(&self, boundary: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let date = boundary.with_timezone(&tz).date_naive();
        match self {
            Self::Hourly => boundary + Duration::hours(1),
            Self::Daily => local_midnight(date + Duration::days(1), tz),
            Self::Weekly => local_midnight(date + Duration::days(7), tz),
            Self::Monthly => {
                let first = first_of_month(date);
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                };
                local_midnight(next.unwrap_or(first + Duration::days(31)), tz)
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CoreError::UnsupportedGranularity(other.to_string())),
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Resolve local 00:00 of `date` in `tz` to a UTC instant.
///
/// Ambiguous midnights take the earlier instant. Midnights skipped by a DST
/// gap resolve to the first valid local hour of that day.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    for hour in 0..4 {
        if let Some(naive) = date.and_hms_opt(hour, 0, 0) {
            if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                return local.with_timezone(&Utc);
            }
        }
    }
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Most buckets a single resolution may produce.
pub const MAX_BUCKETS: usize = 10_000;

/// Reject a range that would resolve to more than [`MAX_BUCKETS`] buckets.
/// The count is bounded from the span alone, before any bucket is built.
pub fn check_bucket_limit(granularity: Granularity, range: &TimeRange) -> CoreResult<()> {
    let span = (range.end - range.start).num_seconds();
    let upper_bound = span / granularity.min_period_seconds() + 2;
    if upper_bound > MAX_BUCKETS as i64 {
        return Err(CoreError::Validation(format!(
            "range too large for {granularity} granularity (more than {MAX_BUCKETS} buckets)"
        )));
    }
    Ok(())
}

/// A half-open interval `[start, end)` with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if end <= start {
            return Err(CoreError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// True if an interval starting at `start` and ending at `end` (open-ended
    /// when `None`) intersects this range. An interval that ends exactly at
    /// `self.start` does not; one that starts inside the range always does,
    /// even with zero length.
    pub fn overlaps(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
        start < self.end && end.map_or(true, |e| e > self.start || start >= self.start)
    }
}

/// A named, owned aggregation scope. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeFrame {
    pub id: String,
    pub site_id: String,
    pub owner_id: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
    pub created_at: DateTime<Utc>,
}

impl TimeFrame {
    pub fn range(&self) -> CoreResult<TimeRange> {
        TimeRange::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTimeFrameRequest {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: String,
}

impl CreateTimeFrameRequest {
    /// Validate the request before anything is written.
    pub fn validate(&self) -> CoreResult<(TimeRange, Granularity)> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("name must not be empty".to_string()));
        }
        if self.name.len() > 100 {
            return Err(CoreError::Validation(
                "name must be 100 characters or fewer".to_string(),
            ));
        }
        let granularity = self.granularity.parse()?;
        let range = TimeRange::new(self.start, self.end)?;
        check_bucket_limit(granularity, &range)?;
        Ok((range, granularity))
    }
}

/// One aggregation bucket. `period` is the natural boundary label; `start`
/// and `end` are clipped to the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub period: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Produce the ordered, non-overlapping, gap-free buckets covering `range`.
pub fn resolve_buckets(
    granularity: Granularity,
    range: &TimeRange,
    tz: Tz,
) -> CoreResult<Vec<Bucket>> {
    check_bucket_limit(granularity, range)?;
    let mut buckets = Vec::new();
    let mut period = granularity.truncate(range.start, tz);
    while period < range.end {
        let next = granularity.next_boundary(period, tz);
        buckets.push(Bucket {
            period,
            start: period.max(range.start),
            end: next.min(range.end),
        });
        period = next;
    }
    Ok(buckets)
}

/// String-typed entry point used at the API edge.
pub fn resolve(
    granularity: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
) -> CoreResult<Vec<Bucket>> {
    let granularity: Granularity = granularity.parse()?;
    let range = TimeRange::new(start, end)?;
    resolve_buckets(granularity, &range, tz)
}
