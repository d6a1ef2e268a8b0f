use anyhow::Result;
use duckdb::OptionalExt;
use tracing::info;

use visitlens_core::event::TenantScope;
use visitlens_core::timeframe::{Granularity, TimeFrame, TimeRange};

use crate::backend::{fmt_ts, generate_id, ts_col};
use crate::DuckDbBackend;

const TIME_FRAME_COLUMNS: &str = "id, site_id, owner_id, name, CAST(start_time AS VARCHAR), \
     CAST(end_time AS VARCHAR), granularity, CAST(created_at AS VARCHAR)";

fn map_time_frame_row(row: &duckdb::Row<'_>) -> Result<TimeFrame, duckdb::Error> {
    let granularity: String = row.get(6)?;
    Ok(TimeFrame {
        id: row.get(0)?,
        site_id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        start: ts_col(row.get(4)?)?,
        end: ts_col(row.get(5)?)?,
        granularity: granularity
            .parse::<Granularity>()
            .map_err(|_| duckdb::Error::InvalidQuery)?,
        created_at: ts_col(row.get(7)?)?,
    })
}

fn get_time_frame_conn(
    conn: &duckdb::Connection,
    scope: &TenantScope,
    time_frame_id: &str,
) -> Result<Option<TimeFrame>> {
    let sql = format!(
        "SELECT {TIME_FRAME_COLUMNS} FROM time_frames \
         WHERE site_id = ?1 AND owner_id = ?2 AND id = ?3"
    );
    let time_frame = conn
        .prepare(&sql)?
        .query_row(
            duckdb::params![scope.site_id, scope.user_id, time_frame_id],
            map_time_frame_row,
        )
        .optional()?;
    Ok(time_frame)
}

pub async fn create_time_frame_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    name: &str,
    range: &TimeRange,
    granularity: Granularity,
) -> Result<TimeFrame> {
    let conn = db.conn.lock().await;
    let id = generate_id("tf_", 16);
    conn.execute(
        "INSERT INTO time_frames \
             (id, site_id, owner_id, name, start_time, end_time, granularity, created_at) \
         VALUES (?1, ?2, ?3, ?4, CAST(?5 AS TIMESTAMP), CAST(?6 AS TIMESTAMP), ?7, \
                 CAST(?8 AS TIMESTAMP))",
        duckdb::params![
            id,
            scope.site_id,
            scope.user_id,
            name.trim(),
            fmt_ts(range.start),
            fmt_ts(range.end),
            granularity.as_str(),
            fmt_ts(chrono::Utc::now()),
        ],
    )?;
    let time_frame = get_time_frame_conn(&conn, scope, &id)?
        .ok_or_else(|| anyhow::anyhow!("time frame {id} missing after insert"))?;
    info!(site_id = %scope.site_id, time_frame_id = %id, "Time frame created");
    Ok(time_frame)
}

pub async fn get_time_frame_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    time_frame_id: &str,
) -> Result<Option<TimeFrame>> {
    let conn = db.conn.lock().await;
    get_time_frame_conn(&conn, scope, time_frame_id)
}

pub async fn list_time_frames_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
) -> Result<Vec<TimeFrame>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {TIME_FRAME_COLUMNS} FROM time_frames \
         WHERE site_id = ?1 AND owner_id = ?2 \
         ORDER BY created_at DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![scope.site_id, scope.user_id],
        map_time_frame_row,
    )?;
    let mut time_frames = Vec::new();
    for row in rows {
        time_frames.push(row?);
    }
    Ok(time_frames)
}
