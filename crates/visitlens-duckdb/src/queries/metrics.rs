use anyhow::Result;
use chrono::Utc;
use duckdb::OptionalExt;
use tracing::info;

use visitlens_core::metric::{CreateMetricRequest, Metric};

use crate::backend::{fmt_ts, generate_id, ts_col};
use crate::DuckDbBackend;

const METRIC_COLUMNS: &str =
    "id, site_id, name, description, is_active, configuration, CAST(created_at AS VARCHAR)";

fn map_metric_row(row: &duckdb::Row<'_>) -> Result<Metric, duckdb::Error> {
    let configuration: String = row.get(5)?;
    Ok(Metric {
        id: row.get(0)?,
        site_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        configuration: serde_json::from_str(&configuration)
            .map_err(|_| duckdb::Error::InvalidQuery)?,
        created_at: ts_col(row.get(6)?)?,
    })
}

fn get_metric_conn(
    conn: &duckdb::Connection,
    site_id: &str,
    metric_id: &str,
) -> Result<Option<Metric>> {
    let sql = format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE site_id = ?1 AND id = ?2");
    let metric = conn
        .prepare(&sql)?
        .query_row(duckdb::params![site_id, metric_id], map_metric_row)
        .optional()?;
    Ok(metric)
}

pub async fn create_metric_inner(
    db: &DuckDbBackend,
    site_id: &str,
    req: &CreateMetricRequest,
) -> Result<Metric> {
    let configuration = serde_json::to_string(&req.configuration)?;
    let id = generate_id("metric_", 16);
    let conn = db.conn.lock().await;
    conn.execute(
        "INSERT INTO metrics (id, site_id, name, description, is_active, configuration, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, CAST(?7 AS TIMESTAMP))",
        duckdb::params![
            id,
            site_id,
            req.name.trim(),
            req.description,
            req.is_active,
            configuration,
            fmt_ts(Utc::now()),
        ],
    )?;
    let metric = get_metric_conn(&conn, site_id, &id)?
        .ok_or_else(|| anyhow::anyhow!("metric {id} missing after insert"))?;
    info!(site_id, metric_id = %metric.id, name = %metric.name, "Metric created");
    Ok(metric)
}

pub async fn get_metric_inner(
    db: &DuckDbBackend,
    site_id: &str,
    metric_id: &str,
) -> Result<Option<Metric>> {
    let conn = db.conn.lock().await;
    get_metric_conn(&conn, site_id, metric_id)
}

pub async fn list_metrics_inner(
    db: &DuckDbBackend,
    site_id: &str,
    include_inactive: bool,
) -> Result<Vec<Metric>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {METRIC_COLUMNS} FROM metrics \
         WHERE site_id = ?1 AND (?2 OR is_active) \
         ORDER BY lower(name) ASC, created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params![site_id, include_inactive], map_metric_row)?;
    let mut metrics = Vec::new();
    for row in rows {
        metrics.push(row?);
    }
    Ok(metrics)
}

/// Returns `None` when no such metric exists for the site.
pub async fn set_metric_active_inner(
    db: &DuckDbBackend,
    site_id: &str,
    metric_id: &str,
    is_active: bool,
) -> Result<Option<Metric>> {
    let conn = db.conn.lock().await;
    let updated = conn.execute(
        "UPDATE metrics SET is_active = ?1 WHERE site_id = ?2 AND id = ?3",
        duckdb::params![is_active, site_id, metric_id],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    get_metric_conn(&conn, site_id, metric_id)
}
