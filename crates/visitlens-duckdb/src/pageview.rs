//! Page-view writes and bounce recomputation.
//!
//! `is_bounce` is evaluated here, on the write path: every insert, duration
//! update and session end re-classifies all page views of the affected
//! session inside the same transaction. A second page view therefore
//! un-bounces the first before any reader can observe the session.

use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use tracing::debug;

use visitlens_core::bounce::BouncePolicy;
use visitlens_core::error::CoreError;
use visitlens_core::event::{PageView, TrackPageView};

use crate::backend::{fmt_ts, ts_col};
use crate::session::get_session_conn;
use crate::DuckDbBackend;

pub(crate) const PAGE_VIEW_COLUMNS: &str = "id, site_id, session_id, visitor_id, url, path, title, \
     duration, is_bounce, CAST(created_at AS VARCHAR), seq";

pub(crate) fn map_page_view_row(row: &duckdb::Row<'_>) -> Result<(PageView, i64), duckdb::Error> {
    Ok((
        PageView {
            id: row.get(0)?,
            site_id: row.get(1)?,
            session_id: row.get(2)?,
            visitor_id: row.get(3)?,
            url: row.get(4)?,
            path: row.get(5)?,
            title: row.get(6)?,
            duration: row.get(7)?,
            is_bounce: row.get(8)?,
            timestamp: ts_col(row.get(9)?)?,
        },
        row.get(10)?,
    ))
}

fn get_page_view_conn(
    conn: &duckdb::Connection,
    site_id: &str,
    page_view_id: &str,
) -> Result<Option<PageView>> {
    let sql =
        format!("SELECT {PAGE_VIEW_COLUMNS} FROM page_views WHERE site_id = ?1 AND id = ?2");
    let page_view = conn
        .prepare(&sql)?
        .query_row(duckdb::params![site_id, page_view_id], map_page_view_row)
        .optional()?
        .map(|(pv, _)| pv);
    Ok(page_view)
}

/// Re-apply `policy` to every page view of `session_id` and persist the
/// flags that changed.
pub(crate) fn recompute_session_bounces(
    conn: &duckdb::Connection,
    policy: BouncePolicy,
    session_id: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, duration, is_bounce FROM page_views \
         WHERE session_id = ?1 ORDER BY created_at, seq",
    )?;
    let rows = stmt.query_map(duckdb::params![session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;
    let mut views = Vec::new();
    let mut current = Vec::new();
    for row in rows {
        let (id, duration, is_bounce) = row?;
        views.push((id, duration));
        current.push(is_bounce);
    }

    for ((id, bounce), was) in policy.classify_session(&views).into_iter().zip(current) {
        if bounce != was {
            conn.execute(
                "UPDATE page_views SET is_bounce = ?1 WHERE id = ?2",
                duckdb::params![bounce, id],
            )?;
        }
    }
    Ok(())
}

pub(crate) async fn record_page_view_inner(
    db: &DuckDbBackend,
    site_id: &str,
    req: &TrackPageView,
    at: DateTime<Utc>,
) -> Result<PageView> {
    if req.url.trim().is_empty() {
        return Err(CoreError::Validation("url must not be empty".to_string()).into());
    }
    if matches!(req.duration, Some(d) if d < 0) {
        return Err(CoreError::Validation("duration must be non-negative".to_string()).into());
    }

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let session = get_session_conn(&tx, site_id, &req.session_id)?
        .ok_or_else(|| CoreError::not_found("session", &req.session_id))?;
    if session.visitor_id != req.visitor_id {
        return Err(CoreError::Validation(format!(
            "session {} does not belong to visitor {}",
            req.session_id, req.visitor_id
        ))
        .into());
    }
    if !session.is_active {
        return Err(
            CoreError::Validation(format!("session {} has ended", req.session_id)).into(),
        );
    }

    let path = if req.path.is_empty() { "/" } else { req.path.as_str() };
    let page_view_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO page_views \
             (id, site_id, session_id, visitor_id, url, path, title, duration, is_bounce, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, FALSE, CAST(?9 AS TIMESTAMP))",
        duckdb::params![
            page_view_id,
            site_id,
            req.session_id,
            req.visitor_id,
            req.url,
            path,
            req.title,
            req.duration,
            fmt_ts(at),
        ],
    )?;
    recompute_session_bounces(&tx, db.bounce, &req.session_id)?;
    let page_view = get_page_view_conn(&tx, site_id, &page_view_id)?
        .ok_or_else(|| anyhow::anyhow!("page view {page_view_id} missing after insert"))?;
    tx.commit()?;

    debug!(site_id, page_view_id = %page_view.id, path = %page_view.path, "Page view recorded");
    Ok(page_view)
}

pub(crate) async fn update_page_view_duration_inner(
    db: &DuckDbBackend,
    site_id: &str,
    page_view_id: &str,
    duration: i64,
) -> Result<PageView> {
    if duration < 0 {
        return Err(CoreError::Validation("duration must be non-negative".to_string()).into());
    }
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let existing = get_page_view_conn(&tx, site_id, page_view_id)?
        .ok_or_else(|| CoreError::not_found("page_view", page_view_id))?;
    tx.execute(
        "UPDATE page_views SET duration = ?1 WHERE site_id = ?2 AND id = ?3",
        duckdb::params![duration, site_id, page_view_id],
    )?;
    recompute_session_bounces(&tx, db.bounce, &existing.session_id)?;
    let page_view = get_page_view_conn(&tx, site_id, page_view_id)?
        .ok_or_else(|| CoreError::not_found("page_view", page_view_id))?;
    tx.commit()?;
    Ok(page_view)
}

pub(crate) async fn get_page_view_inner(
    db: &DuckDbBackend,
    site_id: &str,
    page_view_id: &str,
) -> Result<Option<PageView>> {
    let conn = db.conn.lock().await;
    get_page_view_conn(&conn, site_id, page_view_id)
}
