/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `VISITLENS_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Notes:
///   - Raw tracking tables carry a `seq` column fed by a sequence. Range scans
///     order by `(created_at, seq)` so keyset pagination has a strict total
///     order even when timestamps collide.
///   - Columns rewritten by upserts or updates (`last_visit`, `is_bounce`,
///     `duration`, `end_time`, report `status`/`version`) must stay out of
///     every index: DuckDB turns updates of indexed columns into
///     delete + insert, which trips the primary key inside a transaction.
///   - Session page-view counts are not stored; they are derived from
///     `page_views` at read time.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

CREATE SEQUENCE IF NOT EXISTS seq_sessions START 1;
CREATE SEQUENCE IF NOT EXISTS seq_page_views START 1;
CREATE SEQUENCE IF NOT EXISTS seq_events START 1;
CREATE SEQUENCE IF NOT EXISTS seq_conversions START 1;

-- ===========================================
-- VISITORS
-- ===========================================
-- id = sha256(site_id | identity_key)[0:8] hex. Find-or-create is a single
-- INSERT ... ON CONFLICT (id) DO UPDATE, so one identity is one row.
CREATE TABLE IF NOT EXISTS visitors (
    id                VARCHAR PRIMARY KEY,
    site_id           VARCHAR NOT NULL,
    ip_address        VARCHAR NOT NULL,
    user_agent        VARCHAR NOT NULL,
    referrer          VARCHAR,
    user_id           VARCHAR,
    is_authenticated  BOOLEAN NOT NULL DEFAULT FALSE,
    country           VARCHAR,
    city              VARCHAR,
    device_type       VARCHAR,
    browser           VARCHAR,
    os                VARCHAR,
    first_visit       TIMESTAMP NOT NULL,
    last_visit        TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_visitors_site ON visitors(site_id);

-- ===========================================
-- SESSIONS
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    id                VARCHAR PRIMARY KEY,
    site_id           VARCHAR NOT NULL,
    visitor_id        VARCHAR NOT NULL,
    start_time        TIMESTAMP NOT NULL,
    end_time          TIMESTAMP,
    is_active         BOOLEAN NOT NULL DEFAULT TRUE,
    seq               BIGINT NOT NULL DEFAULT nextval('seq_sessions')
);
CREATE INDEX IF NOT EXISTS idx_sessions_site_start
    ON sessions(site_id, start_time);
CREATE INDEX IF NOT EXISTS idx_sessions_site_visitor
    ON sessions(site_id, visitor_id);

-- ===========================================
-- PAGE VIEWS
-- ===========================================
CREATE TABLE IF NOT EXISTS page_views (
    id                VARCHAR PRIMARY KEY,
    site_id           VARCHAR NOT NULL,
    session_id        VARCHAR NOT NULL,
    visitor_id        VARCHAR NOT NULL,
    url               VARCHAR NOT NULL,
    path              VARCHAR NOT NULL,
    title             VARCHAR,
    duration          BIGINT,                      -- seconds; NULL until reported
    is_bounce         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at        TIMESTAMP NOT NULL,
    seq               BIGINT NOT NULL DEFAULT nextval('seq_page_views')
);
CREATE INDEX IF NOT EXISTS idx_page_views_site_time
    ON page_views(site_id, created_at, seq);
CREATE INDEX IF NOT EXISTS idx_page_views_session
    ON page_views(session_id);

-- ===========================================
-- EVENTS
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id                VARCHAR PRIMARY KEY,
    site_id           VARCHAR NOT NULL,
    session_id        VARCHAR NOT NULL,
    visitor_id        VARCHAR NOT NULL,
    event_type        VARCHAR NOT NULL,            -- click | scroll | form_submit | download | custom
    element_id        VARCHAR,
    element_class     VARCHAR,
    element_text      VARCHAR,
    metadata          VARCHAR NOT NULL DEFAULT '{{}}',  -- JSON object
    created_at        TIMESTAMP NOT NULL,
    seq               BIGINT NOT NULL DEFAULT nextval('seq_events')
);
CREATE INDEX IF NOT EXISTS idx_events_site_time
    ON events(site_id, created_at, seq);

-- ===========================================
-- CONVERSIONS (immutable)
-- ===========================================
CREATE TABLE IF NOT EXISTS conversions (
    id                VARCHAR PRIMARY KEY,
    site_id           VARCHAR NOT NULL,
    visitor_id        VARCHAR NOT NULL,
    conversion_type   VARCHAR NOT NULL,
    value             DOUBLE NOT NULL DEFAULT 0,
    metadata          VARCHAR NOT NULL DEFAULT '{{}}',
    created_at        TIMESTAMP NOT NULL,
    seq               BIGINT NOT NULL DEFAULT nextval('seq_conversions')
);
CREATE INDEX IF NOT EXISTS idx_conversions_site_time
    ON conversions(site_id, created_at, seq);

-- ===========================================
-- TIME FRAMES (never mutated)
-- ===========================================
CREATE TABLE IF NOT EXISTS time_frames (
    id                VARCHAR PRIMARY KEY,         -- 'tf_' + 16 base36 chars
    site_id           VARCHAR NOT NULL,
    owner_id          VARCHAR NOT NULL,
    name              VARCHAR NOT NULL,
    start_time        TIMESTAMP NOT NULL,
    end_time          TIMESTAMP NOT NULL,
    granularity       VARCHAR NOT NULL,            -- hourly | daily | weekly | monthly
    created_at        TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_time_frames_scope
    ON time_frames(site_id, owner_id);

-- ===========================================
-- REPORTS
-- ===========================================
-- `version` is bumped by every generation start; the commit UPDATE is
-- guarded by `version = <ticket>` so a stale generation can never overwrite
-- a newer one.
CREATE TABLE IF NOT EXISTS reports (
    id                VARCHAR PRIMARY KEY,         -- 'report_' + 21 base36 chars
    site_id           VARCHAR NOT NULL,
    owner_id          VARCHAR NOT NULL,
    name              VARCHAR NOT NULL,
    report_type       VARCHAR NOT NULL,            -- visitor | page | conversion | custom
    time_frame_id     VARCHAR NOT NULL,
    data              VARCHAR NOT NULL DEFAULT '{{}}',
    status            VARCHAR NOT NULL DEFAULT 'draft',
    last_generated    TIMESTAMP,
    version           BIGINT NOT NULL DEFAULT 0,
    created_at        TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at        TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_reports_scope
    ON reports(site_id, owner_id);

-- ===========================================
-- METRICS
-- ===========================================
CREATE TABLE IF NOT EXISTS metrics (
    id                VARCHAR PRIMARY KEY,         -- 'metric_' + 16 base36 chars
    site_id           VARCHAR NOT NULL,
    name              VARCHAR NOT NULL,
    description       VARCHAR NOT NULL DEFAULT '',
    is_active         BOOLEAN NOT NULL DEFAULT TRUE,
    configuration     VARCHAR NOT NULL,            -- JSON {{"formula": "..."}}
    created_at        TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_metrics_site
    ON metrics(site_id);
"#
    )
}

/// Migrations tracking table SQL.
///
/// Run before [`init_sql`]. Tracks which numbered migrations have been
/// applied so restarts don't re-run them.
pub const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    id          VARCHAR PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;
