use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::OptionalExt;
use tracing::{debug, info};

use visitlens_core::error::CoreError;
use visitlens_core::event::TenantScope;
use visitlens_core::report::{CreateReportRequest, GenerationTicket, Report, ReportStatus};

use crate::backend::{fmt_ts, generate_id, opt_ts_col, ts_col};
use crate::DuckDbBackend;

const REPORT_COLUMNS: &str = "id, site_id, owner_id, name, report_type, time_frame_id, data, \
     status, CAST(last_generated AS VARCHAR), version, CAST(created_at AS VARCHAR), \
     CAST(updated_at AS VARCHAR)";

fn map_report_row(row: &duckdb::Row<'_>) -> Result<Report, duckdb::Error> {
    let report_type: String = row.get(4)?;
    let data: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(Report {
        id: row.get(0)?,
        site_id: row.get(1)?,
        owner_id: row.get(2)?,
        name: row.get(3)?,
        report_type: report_type.parse().map_err(|_| duckdb::Error::InvalidQuery)?,
        time_frame_id: row.get(5)?,
        data: serde_json::from_str(&data).map_err(|_| duckdb::Error::InvalidQuery)?,
        status: status.parse().map_err(|_| duckdb::Error::InvalidQuery)?,
        last_generated: opt_ts_col(row.get(8)?)?,
        version: row.get(9)?,
        created_at: ts_col(row.get(10)?)?,
        updated_at: ts_col(row.get(11)?)?,
    })
}

fn get_report_conn(
    conn: &duckdb::Connection,
    scope: &TenantScope,
    report_id: &str,
) -> Result<Option<Report>> {
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports WHERE site_id = ?1 AND owner_id = ?2 AND id = ?3"
    );
    let report = conn
        .prepare(&sql)?
        .query_row(
            duckdb::params![scope.site_id, scope.user_id, report_id],
            map_report_row,
        )
        .optional()?;
    Ok(report)
}

pub async fn create_report_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    req: &CreateReportRequest,
) -> Result<Report> {
    let data = if req.data.is_null() {
        "{}".to_string()
    } else {
        serde_json::to_string(&req.data)?
    };
    let now = fmt_ts(Utc::now());
    let id = generate_id("report_", 21);

    let conn = db.conn.lock().await;
    conn.execute(
        r#"
        INSERT INTO reports (
            id, site_id, owner_id, name, report_type, time_frame_id, data,
            status, last_generated, version, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            'draft', NULL, 0, CAST(?8 AS TIMESTAMP), CAST(?8 AS TIMESTAMP)
        )
        "#,
        duckdb::params![
            id,
            scope.site_id,
            scope.user_id,
            req.name.trim(),
            req.report_type.as_str(),
            req.time_frame_id,
            data,
            now,
        ],
    )?;
    get_report_conn(&conn, scope, &id)?
        .ok_or_else(|| anyhow::anyhow!("report {id} missing after insert"))
}

pub async fn get_report_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    report_id: &str,
) -> Result<Option<Report>> {
    let conn = db.conn.lock().await;
    get_report_conn(&conn, scope, report_id)
}

pub async fn list_reports_inner(db: &DuckDbBackend, scope: &TenantScope) -> Result<Vec<Report>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports \
         WHERE site_id = ?1 AND owner_id = ?2 \
         ORDER BY lower(name) ASC, created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params![scope.site_id, scope.user_id], map_report_row)?;
    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }
    Ok(reports)
}

/// Mark the report `generating` and bump its version.
///
/// If another generation is already in flight, the status to restore on
/// abort is derived from whether the report was ever generated.
pub async fn begin_generation_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    report_id: &str,
) -> Result<GenerationTicket> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let report = get_report_conn(&tx, scope, report_id)?
        .ok_or_else(|| CoreError::not_found("report", report_id))?;
    let prior_status = match report.status {
        ReportStatus::Generating if report.last_generated.is_some() => ReportStatus::Generated,
        ReportStatus::Generating => ReportStatus::Draft,
        other => other,
    };
    let version = report.version + 1;
    tx.execute(
        "UPDATE reports SET status = 'generating', version = ?1, updated_at = CAST(?2 AS TIMESTAMP) \
         WHERE site_id = ?3 AND owner_id = ?4 AND id = ?5",
        duckdb::params![
            version,
            fmt_ts(Utc::now()),
            scope.site_id,
            scope.user_id,
            report_id
        ],
    )?;
    tx.commit()?;

    debug!(report_id, version, "Report generation started");
    Ok(GenerationTicket {
        report_id: report_id.to_string(),
        version,
        prior_status,
    })
}

/// Store the finished document. The UPDATE only matches while the report
/// still carries the ticket's version.
pub async fn commit_generation_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    ticket: &GenerationTicket,
    data: &serde_json::Value,
    generated_at: DateTime<Utc>,
) -> Result<Report> {
    let data = serde_json::to_string(data)?;
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE reports \
         SET data = ?1, status = 'generated', last_generated = CAST(?2 AS TIMESTAMP), \
             updated_at = CAST(?2 AS TIMESTAMP) \
         WHERE site_id = ?3 AND owner_id = ?4 AND id = ?5 AND version = ?6",
        duckdb::params![
            data,
            fmt_ts(generated_at),
            scope.site_id,
            scope.user_id,
            ticket.report_id,
            ticket.version
        ],
    )?;
    if updated == 0 {
        return match get_report_conn(&tx, scope, &ticket.report_id)? {
            None => Err(CoreError::not_found("report", &ticket.report_id).into()),
            Some(_) => Err(CoreError::ConcurrencyConflict {
                report_id: ticket.report_id.clone(),
            }
            .into()),
        };
    }
    let report = get_report_conn(&tx, scope, &ticket.report_id)?
        .ok_or_else(|| CoreError::not_found("report", &ticket.report_id))?;
    tx.commit()?;

    info!(report_id = %report.id, version = report.version, "Report generated");
    Ok(report)
}

pub async fn abort_generation_inner(
    db: &DuckDbBackend,
    scope: &TenantScope,
    ticket: &GenerationTicket,
) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE reports SET status = ?1, updated_at = CAST(?2 AS TIMESTAMP) \
         WHERE site_id = ?3 AND owner_id = ?4 AND id = ?5 AND version = ?6 \
           AND status = 'generating'",
        duckdb::params![
            ticket.prior_status.as_str(),
            fmt_ts(Utc::now()),
            scope.site_id,
            scope.user_id,
            ticket.report_id,
            ticket.version
        ],
    )?;
    Ok(())
}
