use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use tracing::debug;

use visitlens_core::error::CoreError;
use visitlens_core::event::{NewVisit, Visitor};
use visitlens_core::visitor::{compute_visitor_id, identity_key};

use crate::backend::{fmt_ts, ts_col};
use crate::DuckDbBackend;

pub(crate) const VISITOR_COLUMNS: &str = "id, site_id, ip_address, user_agent, referrer, user_id, \
     is_authenticated, country, city, device_type, browser, os, \
     CAST(first_visit AS VARCHAR), CAST(last_visit AS VARCHAR)";

pub(crate) fn map_visitor_row(row: &duckdb::Row<'_>) -> Result<Visitor, duckdb::Error> {
    Ok(Visitor {
        id: row.get(0)?,
        site_id: row.get(1)?,
        ip_address: row.get(2)?,
        user_agent: row.get(3)?,
        referrer: row.get(4)?,
        user_id: row.get(5)?,
        is_authenticated: row.get(6)?,
        country: row.get(7)?,
        city: row.get(8)?,
        device_type: row.get(9)?,
        browser: row.get(10)?,
        os: row.get(11)?,
        first_visit: ts_col(row.get(12)?)?,
        last_visit: ts_col(row.get(13)?)?,
    })
}

pub(crate) fn get_visitor_conn(
    conn: &duckdb::Connection,
    site_id: &str,
    visitor_id: &str,
) -> Result<Option<Visitor>> {
    let sql = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE site_id = ?1 AND id = ?2");
    let visitor = conn
        .prepare(&sql)?
        .query_row(duckdb::params![site_id, visitor_id], map_visitor_row)
        .optional()?;
    Ok(visitor)
}

/// Find-or-create the visitor for this identity.
///
/// The id is derived from the identity, so the whole operation is a single
/// upsert on the primary key: two concurrent calls for the same
/// `(site, ip, user_agent)` land on the same row. On conflict `last_visit`
/// only moves forward, `first_visit` only moves back, and enrichment columns
/// are filled only where still NULL.
pub(crate) async fn track_visitor_inner(
    db: &DuckDbBackend,
    visit: &NewVisit,
    at: DateTime<Utc>,
) -> Result<Visitor> {
    let user_id = visit
        .authenticated_user_id
        .as_deref()
        .filter(|id| !id.is_empty());
    let key = identity_key(&visit.ip_address, &visit.user_agent, user_id);
    let visitor_id = compute_visitor_id(&visit.site_id, &key);
    let at_str = fmt_ts(at);

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    tx.execute(
        r#"INSERT INTO visitors (
               id, site_id, ip_address, user_agent, referrer, user_id, is_authenticated,
               country, city, device_type, browser, os, first_visit, last_visit
           ) VALUES (
               ?1, ?2, ?3, ?4, ?5, ?6, ?7,
               ?8, ?9, ?10, ?11, ?12, CAST(?13 AS TIMESTAMP), CAST(?13 AS TIMESTAMP)
           )
           ON CONFLICT (id) DO UPDATE SET
               first_visit      = LEAST(visitors.first_visit, EXCLUDED.first_visit),
               last_visit       = GREATEST(visitors.last_visit, EXCLUDED.last_visit),
               referrer         = COALESCE(visitors.referrer, EXCLUDED.referrer),
               user_id          = COALESCE(visitors.user_id, EXCLUDED.user_id),
               is_authenticated = visitors.is_authenticated OR EXCLUDED.is_authenticated,
               country          = COALESCE(visitors.country, EXCLUDED.country),
               city             = COALESCE(visitors.city, EXCLUDED.city),
               device_type      = COALESCE(visitors.device_type, EXCLUDED.device_type),
               browser          = COALESCE(visitors.browser, EXCLUDED.browser),
               os               = COALESCE(visitors.os, EXCLUDED.os)"#,
        duckdb::params![
            visitor_id,
            visit.site_id,
            visit.ip_address,
            visit.user_agent,
            visit.referrer.as_deref().filter(|r| !r.is_empty()),
            user_id,
            user_id.is_some(),
            visit.country,
            visit.city,
            visit.device_type,
            visit.browser,
            visit.os,
            at_str,
        ],
    )?;
    let visitor = get_visitor_conn(&tx, &visit.site_id, &visitor_id)?
        .ok_or_else(|| anyhow::anyhow!("visitor {visitor_id} missing after upsert"))?;
    tx.commit()?;

    debug!(site_id = %visit.site_id, visitor_id = %visitor.id, "Visitor tracked");
    Ok(visitor)
}

pub(crate) async fn get_visitor_inner(
    db: &DuckDbBackend,
    site_id: &str,
    visitor_id: &str,
) -> Result<Option<Visitor>> {
    let conn = db.conn.lock().await;
    get_visitor_conn(&conn, site_id, visitor_id)
}

/// Manual location override; unlike tracking, this replaces non-NULL values.
pub(crate) async fn update_visitor_location_inner(
    db: &DuckDbBackend,
    site_id: &str,
    visitor_id: &str,
    country: Option<&str>,
    city: Option<&str>,
) -> Result<Visitor> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE visitors SET country = ?1, city = ?2 WHERE site_id = ?3 AND id = ?4",
        duckdb::params![country, city, site_id, visitor_id],
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("visitor", visitor_id).into());
    }
    let visitor = get_visitor_conn(&tx, site_id, visitor_id)?
        .ok_or_else(|| CoreError::not_found("visitor", visitor_id))?;
    tx.commit()?;

    debug!(site_id, visitor_id, "Visitor location updated");
    Ok(visitor)
}
