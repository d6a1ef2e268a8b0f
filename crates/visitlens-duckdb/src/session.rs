use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use tracing::debug;

use visitlens_core::error::CoreError;
use visitlens_core::event::Session;
use visitlens_core::timeframe::TimeRange;

use crate::backend::{fmt_ts, opt_ts_col, ts_col};
use crate::pageview::recompute_session_bounces;
use crate::visitor::get_visitor_conn;
use crate::DuckDbBackend;

/// Session columns plus the page-view count, derived with a grouped CTE
/// (DuckDB does not support correlated subqueries here).
const SESSION_SELECT: &str = r#"
    WITH counts AS (
        SELECT session_id, COUNT(*) AS n
        FROM page_views
        WHERE site_id = ?1
        GROUP BY session_id
    )
    SELECT
        s.id,
        s.site_id,
        s.visitor_id,
        CAST(s.start_time AS VARCHAR),
        CAST(s.end_time AS VARCHAR),
        s.is_active,
        COALESCE(c.n, 0)
    FROM sessions s
    LEFT JOIN counts c ON c.session_id = s.id
    WHERE s.site_id = ?1"#;

fn map_session_row(row: &duckdb::Row<'_>) -> Result<Session, duckdb::Error> {
    Ok(Session {
        id: row.get(0)?,
        site_id: row.get(1)?,
        visitor_id: row.get(2)?,
        start_time: ts_col(row.get(3)?)?,
        end_time: opt_ts_col(row.get(4)?)?,
        is_active: row.get(5)?,
        page_view_count: row.get(6)?,
    })
}

pub(crate) fn get_session_conn(
    conn: &duckdb::Connection,
    site_id: &str,
    session_id: &str,
) -> Result<Option<Session>> {
    let sql = format!("{SESSION_SELECT} AND s.id = ?2");
    let session = conn
        .prepare(&sql)?
        .query_row(duckdb::params![site_id, session_id], map_session_row)
        .optional()?;
    Ok(session)
}

pub(crate) async fn start_session_inner(
    db: &DuckDbBackend,
    site_id: &str,
    visitor_id: &str,
    at: DateTime<Utc>,
) -> Result<Session> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    if get_visitor_conn(&tx, site_id, visitor_id)?.is_none() {
        return Err(CoreError::not_found("visitor", visitor_id).into());
    }
    let session_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO sessions (id, site_id, visitor_id, start_time, end_time, is_active) \
         VALUES (?1, ?2, ?3, CAST(?4 AS TIMESTAMP), NULL, TRUE)",
        duckdb::params![session_id, site_id, visitor_id, fmt_ts(at)],
    )?;
    let session = get_session_conn(&tx, site_id, &session_id)?
        .ok_or_else(|| anyhow::anyhow!("session {session_id} missing after insert"))?;
    tx.commit()?;
    debug!(site_id, visitor_id, session_id = %session.id, "Session started");
    Ok(session)
}

/// End a session. Ending an already ended session is a no-op; `end_time`
/// never precedes `start_time`.
pub(crate) async fn end_session_inner(
    db: &DuckDbBackend,
    site_id: &str,
    session_id: &str,
    at: DateTime<Utc>,
) -> Result<Session> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let session = get_session_conn(&tx, site_id, session_id)?
        .ok_or_else(|| CoreError::not_found("session", session_id))?;
    if !session.is_active {
        return Ok(session);
    }
    let end = at.max(session.start_time);
    tx.execute(
        "UPDATE sessions SET end_time = CAST(?1 AS TIMESTAMP), is_active = FALSE \
         WHERE site_id = ?2 AND id = ?3",
        duckdb::params![fmt_ts(end), site_id, session_id],
    )?;
    recompute_session_bounces(&tx, db.bounce, session_id)?;
    let session = get_session_conn(&tx, site_id, session_id)?
        .ok_or_else(|| CoreError::not_found("session", session_id))?;
    tx.commit()?;
    debug!(site_id, session_id, "Session ended");
    Ok(session)
}

pub(crate) async fn get_session_inner(
    db: &DuckDbBackend,
    site_id: &str,
    session_id: &str,
) -> Result<Option<Session>> {
    let conn = db.conn.lock().await;
    get_session_conn(&conn, site_id, session_id)
}

pub(crate) async fn sessions_overlapping_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
) -> Result<Vec<Session>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "{SESSION_SELECT} \
         AND s.start_time < CAST(?3 AS TIMESTAMP) \
         AND (s.end_time IS NULL OR s.end_time > CAST(?2 AS TIMESTAMP) OR s.start_time >= CAST(?2 AS TIMESTAMP)) \
         ORDER BY s.start_time, s.seq"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![site_id, fmt_ts(range.start), fmt_ts(range.end)],
        map_session_row,
    )?;
    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?);
    }
    Ok(sessions)
}

/// First-ever session of every visitor with a session overlapping `range`.
/// Looks at the visitor's whole history, not just the range.
pub(crate) async fn first_sessions_inner(
    db: &DuckDbBackend,
    site_id: &str,
    range: &TimeRange,
) -> Result<HashMap<String, String>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        r#"
        WITH active AS (
            SELECT DISTINCT visitor_id
            FROM sessions
            WHERE site_id = ?1
              AND start_time < CAST(?3 AS TIMESTAMP)
              AND (end_time IS NULL OR end_time > CAST(?2 AS TIMESTAMP) OR start_time >= CAST(?2 AS TIMESTAMP))
        ),
        ranked AS (
            SELECT
                s.visitor_id,
                s.id,
                ROW_NUMBER() OVER (PARTITION BY s.visitor_id ORDER BY s.start_time, s.seq) AS rn
            FROM sessions s
            JOIN active a ON a.visitor_id = s.visitor_id
            WHERE s.site_id = ?1
        )
        SELECT visitor_id, id FROM ranked WHERE rn = 1
        "#,
    )?;
    let rows = stmt.query_map(
        duckdb::params![site_id, fmt_ts(range.start), fmt_ts(range.end)],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;
    let mut first = HashMap::new();
    for row in rows {
        let (visitor_id, session_id) = row?;
        first.insert(visitor_id, session_id);
    }
    Ok(first)
}
