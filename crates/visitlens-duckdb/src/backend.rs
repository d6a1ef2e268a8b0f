use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::info;

use visitlens_core::bounce::BouncePolicy;

use crate::schema::{init_sql, MIGRATIONS_TABLE_SQL};

/// DuckDB-backed event store.
///
/// DuckDB is single-writer, so the connection sits behind
/// `Arc<Mutex<_>>`: every store operation holds the lock for its whole
/// transaction, which makes each write one exclusive, atomic step while the
/// struct stays cheap to clone and share across Axum handlers.
///
/// The bounce policy lives here because bounce flags are recomputed on the
/// write path (see [`crate::pageview`]).
#[derive(Clone)]
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) bounce: BouncePolicy,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str, bounce: BouncePolicy) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open DuckDB at {path}"))?;
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(
            path,
            memory_limit,
            bounce_threshold_seconds = bounce.threshold_seconds,
            "DuckDB opened"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            bounce,
        })
    }

    /// Open an in-memory database with the default bounce policy.
    ///
    /// Intended for tests: data is discarded when the last clone is dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(BouncePolicy::default())
    }

    pub fn open_in_memory_with(bounce: BouncePolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            bounce,
        })
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the connection lock for direct queries.
    ///
    /// Intended for integration tests that need to inspect stored rows.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Format a timestamp for a DuckDB `TIMESTAMP` parameter (microsecond
/// precision, UTC, no offset).
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Parse a `CAST(ts AS VARCHAR)` value back into UTC.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid stored timestamp: {raw}"))
}

/// Row-closure variant of [`parse_ts`].
pub(crate) fn ts_col(raw: String) -> Result<DateTime<Utc>, duckdb::Error> {
    parse_ts(&raw).map_err(|_| duckdb::Error::InvalidQuery)
}

pub(crate) fn opt_ts_col(raw: Option<String>) -> Result<Option<DateTime<Utc>>, duckdb::Error> {
    raw.map(ts_col).transpose()
}

/// `prefix` + `len` random lowercase base36 chars.
pub(crate) fn generate_id(prefix: &str, len: usize) -> String {
    let mut rng = rand::thread_rng();
    let chars: String = (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..36u8);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect();
    format!("{prefix}{chars}")
}
