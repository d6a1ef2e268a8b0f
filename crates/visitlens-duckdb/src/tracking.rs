use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use tracing::{debug, info};

use visitlens_core::error::CoreError;
use visitlens_core::event::{Conversion, Event, EventType, Metadata, TrackConversion, TrackEvent};

use crate::backend::{fmt_ts, ts_col};
use crate::session::get_session_conn;
use crate::visitor::get_visitor_conn;
use crate::DuckDbBackend;

pub(crate) const EVENT_COLUMNS: &str = "id, site_id, session_id, visitor_id, event_type, \
     element_id, element_class, element_text, metadata, CAST(created_at AS VARCHAR), seq";

pub(crate) const CONVERSION_COLUMNS: &str = "id, site_id, visitor_id, conversion_type, value, \
     metadata, CAST(created_at AS VARCHAR), seq";

fn metadata_col(raw: String) -> Result<Metadata, duckdb::Error> {
    serde_json::from_str(&raw).map_err(|_| duckdb::Error::InvalidQuery)
}

pub(crate) fn map_event_row(row: &duckdb::Row<'_>) -> Result<(Event, i64), duckdb::Error> {
    let event_type: String = row.get(4)?;
    Ok((
        Event {
            id: row.get(0)?,
            site_id: row.get(1)?,
            session_id: row.get(2)?,
            visitor_id: row.get(3)?,
            event_type: EventType::parse(&event_type).ok_or(duckdb::Error::InvalidQuery)?,
            element_id: row.get(5)?,
            element_class: row.get(6)?,
            element_text: row.get(7)?,
            metadata: metadata_col(row.get(8)?)?,
            timestamp: ts_col(row.get(9)?)?,
        },
        row.get(10)?,
    ))
}

pub(crate) fn map_conversion_row(
    row: &duckdb::Row<'_>,
) -> Result<(Conversion, i64), duckdb::Error> {
    Ok((
        Conversion {
            id: row.get(0)?,
            site_id: row.get(1)?,
            visitor_id: row.get(2)?,
            conversion_type: row.get(3)?,
            value: row.get(4)?,
            metadata: metadata_col(row.get(5)?)?,
            timestamp: ts_col(row.get(6)?)?,
        },
        row.get(7)?,
    ))
}

pub(crate) async fn record_event_inner(
    db: &DuckDbBackend,
    site_id: &str,
    req: &TrackEvent,
    at: DateTime<Utc>,
) -> Result<Event> {
    let metadata = serde_json::to_string(&req.metadata)?;

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

    let event_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO events \
             (id, site_id, session_id, visitor_id, event_type, element_id, element_class, \
              element_text, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, CAST(?10 AS TIMESTAMP))",
        duckdb::params![
            event_id,
            site_id,
            req.session_id,
            req.visitor_id,
            req.event_type.as_str(),
            req.element_id,
            req.element_class,
            req.element_text,
            metadata,
            fmt_ts(at),
        ],
    )?;
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
    let (event, _) = tx
        .prepare(&sql)?
        .query_row(duckdb::params![event_id], map_event_row)
        .optional()?
        .ok_or_else(|| anyhow::anyhow!("event {event_id} missing after insert"))?;
    tx.commit()?;

    debug!(site_id, event_id = %event.id, event_type = event.event_type.as_str(), "Event recorded");
    Ok(event)
}

pub(crate) async fn record_conversion_inner(
    db: &DuckDbBackend,
    site_id: &str,
    req: &TrackConversion,
    at: DateTime<Utc>,
) -> Result<Conversion> {
    let conversion_type = req.conversion_type.trim();
    if conversion_type.is_empty() {
        return Err(CoreError::Validation("conversion_type must not be empty".to_string()).into());
    }
    if !req.value.is_finite() {
        return Err(CoreError::Validation("value must be a finite number".to_string()).into());
    }
    let metadata = serde_json::to_string(&req.metadata)?;

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    if get_visitor_conn(&tx, site_id, &req.visitor_id)?.is_none() {
        return Err(CoreError::not_found("visitor", &req.visitor_id).into());
    }

    let conversion_id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO conversions \
             (id, site_id, visitor_id, conversion_type, value, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, CAST(?7 AS TIMESTAMP))",
        duckdb::params![
            conversion_id,
            site_id,
            req.visitor_id,
            conversion_type,
            req.value,
            metadata,
            fmt_ts(at),
        ],
    )?;
    let sql = format!("SELECT {CONVERSION_COLUMNS} FROM conversions WHERE id = ?1");
    let (conversion, _) = tx
        .prepare(&sql)?
        .query_row(duckdb::params![conversion_id], map_conversion_row)
        .optional()?
        .ok_or_else(|| anyhow::anyhow!("conversion {conversion_id} missing after insert"))?;
    tx.commit()?;

    info!(
        site_id,
        conversion_id = %conversion.id,
        conversion_type = %conversion.conversion_type,
        value = conversion.value,
        "Conversion recorded"
    );
    Ok(conversion)
}
