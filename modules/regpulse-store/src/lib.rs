//! SQLite-backed store for regulation events, their history, canonical laws
//! and crawl runs. The store exclusively owns all entities; fetchers and the
//! analyzer produce value objects that it consumes.

pub mod backfill;
pub mod canon;
pub mod events;
pub mod queries;
pub mod runs;
pub mod schema;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub use backfill::BackfillSummary;
pub use canon::{infer_canonical_law, CanonicalLaw, LawSignals};
pub use events::{EventRow, HistoryRow};
pub use queries::{
    country_flag, ApiEvent, Brief, BriefItem, EventDetail, EventFilter, EventsPage, LawDetail,
    LawRow, LawUpdateRow,
};
pub use runs::CrawlRunRow;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the durable store and run schema migrations.
    /// `:memory:` is permitted for tests.
    pub async fn connect(database_path: &str) -> Result<Self> {
        let (options, pool_options) = if database_path == ":memory:" {
            // A pooled in-memory database must stay on one never-reaped
            // connection or a checkout could see a fresh empty database.
            let pool_options = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (SqliteConnectOptions::from_str("sqlite::memory:")?, pool_options)
        } else {
            if let Some(parent) = std::path::Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5));
            (options, SqlitePoolOptions::new().max_connections(4))
        };

        let pool = pool_options
            .connect_with(options.foreign_keys(true))
            .await
            .context("Failed to open SQLite database")?;

        schema::migrate(&pool).await?;

        info!(database_path, "Store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
