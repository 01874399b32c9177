//! Crawl-run lifecycle: single-flight start, terminal status writes,
//! startup reconciliation and notification seeding.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use regpulse_common::RegPulseError;

use crate::Store;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CrawlRunRow {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub items_found: i64,
    pub items_new: i64,
    pub items_updated: i64,
    pub error_message: Option<String>,
}

impl Store {
    /// Create a `running` crawl_run row, refusing if one is already running.
    /// The check and insert share one transaction so overlapping triggers
    /// cannot both pass the gate.
    pub async fn start_run(&self) -> Result<CrawlRunRow, RegPulseError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let (running,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM crawl_runs WHERE status = 'running'",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        if running > 0 {
            return Err(RegPulseError::CrawlConflict);
        }

        let row = sqlx::query_as::<_, CrawlRunRow>(
            r#"
            INSERT INTO crawl_runs (started_at, status)
            VALUES (?, 'running')
            RETURNING id, started_at, completed_at, status,
                      items_found, items_new, items_updated, error_message
            "#,
        )
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

        info!(run_id = row.id, "Crawl run started");
        Ok(row)
    }

    pub async fn complete_run(
        &self,
        run_id: i64,
        items_found: i64,
        items_new: i64,
        items_updated: i64,
    ) -> Result<(), RegPulseError> {
        sqlx::query(
            r#"
            UPDATE crawl_runs
            SET status = 'completed', completed_at = ?,
                items_found = ?, items_new = ?, items_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(items_found)
        .bind(items_new)
        .bind(items_updated)
        .bind(run_id)
        .execute(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        info!(run_id, items_found, items_new, items_updated, "Crawl run completed");
        Ok(())
    }

    pub async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<(), RegPulseError> {
        sqlx::query(
            r#"
            UPDATE crawl_runs
            SET status = 'failed', completed_at = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(error_message)
        .bind(run_id)
        .execute(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        warn!(run_id, error_message, "Crawl run failed");
        Ok(())
    }

    /// Latest run row, if any run has ever been recorded.
    pub async fn latest_run(&self) -> Result<Option<CrawlRunRow>, RegPulseError> {
        sqlx::query_as::<_, CrawlRunRow>(
            r#"
            SELECT id, started_at, completed_at, status,
                   items_found, items_new, items_updated, error_message
            FROM crawl_runs
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))
    }

    /// Mark any `running` run left behind by a previous process as failed.
    /// Called once at startup, before the trigger surface opens.
    pub async fn reconcile_stale_runs(&self) -> Result<u64, RegPulseError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs
            SET status = 'failed', completed_at = ?,
                error_message = 'Interrupted by process restart'
            WHERE status = 'running'
            "#,
        )
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let reconciled = result.rows_affected();
        if reconciled > 0 {
            warn!(reconciled, "Reconciled stale running crawl runs to failed");
        }
        Ok(reconciled)
    }

    /// Seed notifications for high-risk events created since `since` that
    /// have not been notified yet. Severity is `critical` at chili 5, `high`
    /// at chili 4.
    pub async fn seed_notifications(
        &self,
        since: DateTime<Utc>,
    ) -> Result<u64, RegPulseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (event_id, severity, title, body, created_at)
            SELECT e.id,
                   CASE WHEN e.chili_score >= 5 THEN 'critical' ELSE 'high' END,
                   e.title,
                   e.summary,
                   ?
            FROM regulation_events e
            WHERE e.chili_score >= 4
              AND e.created_at >= ?
              AND NOT EXISTS (SELECT 1 FROM notifications n WHERE n.event_id = e.id)
            "#,
        )
        .bind(Utc::now())
        .bind(since)
        .execute(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let seeded = result.rows_affected();
        if seeded > 0 {
            info!(seeded, "Seeded notifications for high-risk events");
        }
        Ok(seeded)
    }
}
