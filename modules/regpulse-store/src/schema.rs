//! Schema initialization and additive migrations.
//!
//! Migrations never drop or re-type columns. New columns appear both in the
//! CREATE TABLE (fresh databases) and as a guarded ALTER ADD COLUMN (existing
//! databases), probed via `PRAGMA table_info`.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    info!("Running schema migrations...");

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            name                 TEXT NOT NULL UNIQUE,
            url                  TEXT NOT NULL UNIQUE,
            source_type          TEXT NOT NULL,
            authority_type       TEXT NOT NULL,
            jurisdiction         TEXT NOT NULL DEFAULT '',
            reliability_tier     INTEGER NOT NULL DEFAULT 3
                                 CHECK (reliability_tier BETWEEN 1 AND 5),
            last_crawled_at      TEXT,
            created_at           TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS regulation_events (
            id                    TEXT PRIMARY KEY,
            title                 TEXT NOT NULL,
            jurisdiction_country  TEXT NOT NULL,
            jurisdiction_state    TEXT,
            stage                 TEXT NOT NULL,
            is_under16_applicable INTEGER NOT NULL DEFAULT 0,
            age_bracket           TEXT NOT NULL DEFAULT 'both',
            impact_score          INTEGER NOT NULL CHECK (impact_score BETWEEN 1 AND 5),
            likelihood_score      INTEGER NOT NULL CHECK (likelihood_score BETWEEN 1 AND 5),
            confidence_score      INTEGER NOT NULL CHECK (confidence_score BETWEEN 1 AND 5),
            chili_score           INTEGER NOT NULL CHECK (chili_score BETWEEN 1 AND 5),
            summary               TEXT NOT NULL DEFAULT '',
            business_impact       TEXT NOT NULL DEFAULT '',
            required_solutions    TEXT,
            affected_products     TEXT,
            competitor_responses  TEXT,
            raw_text              TEXT,
            source_url_link       TEXT NOT NULL DEFAULT '',
            effective_date        TEXT,
            published_date        TEXT,
            source_id             INTEGER REFERENCES sources(id),
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS event_history (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id       TEXT NOT NULL REFERENCES regulation_events(id),
            changed_at     TEXT NOT NULL,
            changed_by     TEXT NOT NULL DEFAULT 'pipeline',
            change_type    TEXT NOT NULL,
            field_name     TEXT,
            previous_value TEXT,
            new_value      TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS laws (
            id                             INTEGER PRIMARY KEY AUTOINCREMENT,
            law_key                        TEXT NOT NULL UNIQUE,
            law_name                       TEXT NOT NULL,
            jurisdiction_country           TEXT NOT NULL,
            jurisdiction_state             TEXT,
            law_type                       TEXT NOT NULL DEFAULT 'law',
            stage                          TEXT NOT NULL,
            status                         TEXT NOT NULL,
            first_seen_at                  TEXT,
            last_seen_at                   TEXT,
            latest_effective_date          TEXT,
            aggregate_risk_max             REAL NOT NULL DEFAULT 0,
            aggregate_risk_recent_weighted REAL NOT NULL DEFAULT 0,
            aggregate_risk_overall         REAL NOT NULL DEFAULT 0,
            source_confidence              REAL NOT NULL DEFAULT 0,
            created_at                     TEXT NOT NULL,
            updated_at                     TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS law_updates (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            law_id           INTEGER NOT NULL REFERENCES laws(id) ON DELETE CASCADE,
            event_id         TEXT NOT NULL,
            title            TEXT NOT NULL,
            stage            TEXT NOT NULL,
            summary          TEXT,
            business_impact  TEXT,
            impact_score     INTEGER,
            likelihood_score INTEGER,
            confidence_score INTEGER,
            chili_score      INTEGER,
            published_date   TEXT,
            effective_date   TEXT,
            source_url       TEXT,
            raw_metadata     TEXT,
            created_at       TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS crawl_runs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at    TEXT NOT NULL,
            completed_at  TEXT,
            status        TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            items_found   INTEGER NOT NULL DEFAULT 0,
            items_new     INTEGER NOT NULL DEFAULT 0,
            items_updated INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id   TEXT NOT NULL REFERENCES regulation_events(id),
            severity   TEXT NOT NULL,
            title      TEXT NOT NULL,
            body       TEXT,
            created_at TEXT NOT NULL,
            read_at    TEXT
        )
        "#,
    ];

    for sql in tables {
        sqlx::query(sql).execute(pool).await?;
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_events_stage ON regulation_events(stage)",
        "CREATE INDEX IF NOT EXISTS idx_events_country ON regulation_events(jurisdiction_country)",
        "CREATE INDEX IF NOT EXISTS idx_events_state ON regulation_events(jurisdiction_state)",
        "CREATE INDEX IF NOT EXISTS idx_events_age_bracket ON regulation_events(age_bracket)",
        "CREATE INDEX IF NOT EXISTS idx_events_published ON regulation_events(published_date)",
        "CREATE INDEX IF NOT EXISTS idx_events_updated ON regulation_events(updated_at)",
        // Hard-enforced primary dedup triple.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedup
         ON regulation_events(source_url_link, jurisdiction_country, title)",
        "CREATE INDEX IF NOT EXISTS idx_history_event
         ON event_history(event_id, changed_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_laws_jurisdiction
         ON laws(jurisdiction_country, jurisdiction_state)",
        "CREATE INDEX IF NOT EXISTS idx_laws_stage ON laws(stage)",
        "CREATE INDEX IF NOT EXISTS idx_laws_risk
         ON laws(aggregate_risk_max DESC, aggregate_risk_recent_weighted DESC)",
        "CREATE INDEX IF NOT EXISTS idx_law_updates_law
         ON law_updates(law_id, published_date DESC, created_at DESC)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_law_updates_event ON law_updates(event_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_event ON notifications(event_id)",
        "CREATE INDEX IF NOT EXISTS idx_crawl_runs_status ON crawl_runs(status)",
    ];

    for sql in indexes {
        sqlx::query(sql).execute(pool).await?;
    }

    // Columns added after the first deployed schema. Fresh databases already
    // have them from CREATE TABLE; existing ones get the guarded ALTER.
    let additive_columns = [
        ("regulation_events", "competitor_responses", "TEXT"),
        ("regulation_events", "is_under16_applicable", "INTEGER NOT NULL DEFAULT 0"),
        ("law_updates", "raw_metadata", "TEXT"),
        ("sources", "last_crawled_at", "TEXT"),
        ("notifications", "read_at", "TEXT"),
    ];

    for (table, column, column_type) in additive_columns {
        add_column_if_missing(pool, table, column, column_type).await?;
    }

    info!("Schema migrations complete");
    Ok(())
}

/// Probe `PRAGMA table_info` for a column before ALTER ADD COLUMN.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    column_type: &str,
) -> Result<()> {
    if column_exists(pool, table, column).await? {
        return Ok(());
    }
    info!(table, column, "Adding column");
    sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {column_type}"))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query_as::<_, (i64, String)>(&format!(
        "SELECT cid, name FROM pragma_table_info('{table}')"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().any(|(_, name)| name == column))
}
