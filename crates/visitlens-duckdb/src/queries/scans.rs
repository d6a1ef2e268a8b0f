use anyhow::Result;
use chrono::{DateTime, Utc};

use visitlens_core::event::{Conversion, Event, PageView, Visitor};
use visitlens_core::store::{ScanCursor, ScanPage};
use visitlens_core::timeframe::TimeRange;

use crate::backend::fmt_ts;
use crate::pageview::{map_page_view_row, PAGE_VIEW_COLUMNS};
use crate::tracking::{map_conversion_row, map_event_row, CONVERSION_COLUMNS, EVENT_COLUMNS};
use crate::visitor::{map_visitor_row, VISITOR_COLUMNS};
use crate::DuckDbBackend;

type RowMapper<T> = fn(&duckdb::Row<'_>) -> Result<(T, i64), duckdb::Error>;

/// One keyset page of `table` inside `range`, ordered by `(created_at, seq)`.
///
/// The cursor predicate is strictly greater than the last returned row, so a
/// row is never repeated across pages and rows inserted behind the cursor
/// are not picked up mid-scan.
fn scan_table<T>(
    conn: &duckdb::Connection,
    table: &str,
    columns: &str,
    map_row: RowMapper<T>,
    timestamp_of: fn(&T) -> DateTime<Utc>,
    site_id: &str,
    range: &TimeRange,
    after: Option<&ScanCursor>,
    limit: usize,
) -> Result<ScanPage<T>> {
    let limit = limit.max(1);
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![
        Box::new(site_id.to_string()),
        Box::new(fmt_ts(range.start)),
        Box::new(fmt_ts(range.end)),
    ];
    let mut cursor_filter = String::new();
    if let Some(cursor) = after {
        cursor_filter.push_str(
            " AND (created_at > CAST(?4 AS TIMESTAMP) \
               OR (created_at = CAST(?4 AS TIMESTAMP) AND seq > ?5))",
        );
        params.push(Box::new(fmt_ts(cursor.timestamp)));
        params.push(Box::new(cursor.seq));
    }
    let sql = format!(
        "SELECT {columns} FROM {table} \
         WHERE site_id = ?1 \
           AND created_at >= CAST(?2 AS TIMESTAMP) \
           AND created_at < CAST(?3 AS TIMESTAMP){cursor_filter} \
         ORDER BY created_at, seq \
         LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params_from_iter(params.iter().map(|p| p.as_ref())),
        map_row,
    )?;
    let mut out = Vec::new();
    let mut last_seq = None;
    for row in rows {
        let (item, seq) = row?;
        last_seq = Some(seq);
        out.push(item);
    }

    let next = match (out.last(), last_seq) {
        (Some(last), Some(seq)) if out.len() == limit => Some(ScanCursor {
            timestamp: timestamp_of(last),
            seq,
        }),
        _ => None,
    };
    Ok(ScanPage { rows: out, next })
}

pub async fn scan_page_views_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
    after: Option<&ScanCursor>,
    limit: usize,
) -> Result<ScanPage<PageView>> {
    let conn = db.conn.lock().await;
    scan_table(
        &conn,
        "page_views",
        PAGE_VIEW_COLUMNS,
        map_page_view_row,
        |pv| pv.timestamp,
        site_id,
        range,
        after,
        limit,
    )
}

pub async fn scan_events_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
    after: Option<&ScanCursor>,
    limit: usize,
) -> Result<ScanPage<Event>> {
    let conn = db.conn.lock().await;
    scan_table(
        &conn,
        "events",
        EVENT_COLUMNS,
        map_event_row,
        |event| event.timestamp,
        site_id,
        range,
        after,
        limit,
    )
}

pub async fn scan_conversions_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
    after: Option<&ScanCursor>,
    limit: usize,
) -> Result<ScanPage<Conversion>> {
    let conn = db.conn.lock().await;
    scan_table(
        &conn,
        "conversions",
        CONVERSION_COLUMNS,
        map_conversion_row,
        |conversion| conversion.timestamp,
        site_id,
        range,
        after,
        limit,
    )
}

/// Visitors first seen inside `range`, plus every visitor with a session,
/// page view, event or conversion in it.
pub async fn visitors_in_range_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
) -> Result<Vec<Visitor>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        r#"
        WITH active AS (
            SELECT visitor_id FROM sessions
            WHERE site_id = ?1
              AND start_time < CAST(?3 AS TIMESTAMP)
              AND (end_time IS NULL OR end_time > CAST(?2 AS TIMESTAMP) OR start_time >= CAST(?2 AS TIMESTAMP))
            UNION
            SELECT visitor_id FROM page_views
            WHERE site_id = ?1
              AND created_at >= CAST(?2 AS TIMESTAMP) AND created_at < CAST(?3 AS TIMESTAMP)
            UNION
            SELECT visitor_id FROM events
            WHERE site_id = ?1
              AND created_at >= CAST(?2 AS TIMESTAMP) AND created_at < CAST(?3 AS TIMESTAMP)
            UNION
            SELECT visitor_id FROM conversions
            WHERE site_id = ?1
              AND created_at >= CAST(?2 AS TIMESTAMP) AND created_at < CAST(?3 AS TIMESTAMP)
        )
        SELECT {VISITOR_COLUMNS}
        FROM visitors
        WHERE site_id = ?1
          AND (
              (first_visit >= CAST(?2 AS TIMESTAMP) AND first_visit < CAST(?3 AS TIMESTAMP))
              OR id IN (SELECT visitor_id FROM active)
          )
        ORDER BY first_visit, id
        "#
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![site_id, fmt_ts(range.start), fmt_ts(range.end)],
        map_visitor_row,
    )?;
    let mut visitors = Vec::new();
    for row in rows {
        visitors.push(row?);
    }
    Ok(visitors)
}
