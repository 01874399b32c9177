//! Deduplicating event upsert and append-only history.
//!
//! Upserts run inside an enclosing transaction owned by the caller; the
//! pipeline batches every upsert of a crawl run into one transaction so
//! readers see either the whole run's effects or none of it.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use regpulse_common::{
    normalize_url, regulation_key, text_hash, truncate_chars, EventInput, RegPulseError, Source,
    UpsertOutcome,
};

use crate::Store;

/// Stored raw_text is bounded; anything longer is truncated at upsert.
pub const RAW_TEXT_MAX_CHARS: usize = 5_000;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct EventRow {
    pub id: String,
    pub title: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    pub stage: String,
    pub is_under16_applicable: bool,
    pub age_bracket: String,
    pub impact_score: i64,
    pub likelihood_score: i64,
    pub confidence_score: i64,
    pub chili_score: i64,
    pub summary: String,
    pub business_impact: String,
    pub required_solutions: Option<String>,
    pub affected_products: Option<String>,
    pub competitor_responses: Option<String>,
    pub raw_text: Option<String>,
    pub source_url_link: String,
    pub effective_date: Option<String>,
    pub published_date: Option<String>,
    pub source_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub event_id: String,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub change_type: String,
    pub field_name: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
}

/// The candidate subset the dedup scan compares against.
#[derive(Debug, sqlx::FromRow)]
struct Candidate {
    id: String,
    title: String,
    jurisdiction_state: Option<String>,
    stage: String,
    summary: String,
    business_impact: String,
    age_bracket: String,
    impact_score: i64,
    likelihood_score: i64,
    confidence_score: i64,
    chili_score: i64,
    source_url_link: String,
    raw_text: Option<String>,
}

impl Store {
    /// Insert the source if unseen, otherwise refresh reliability and
    /// last_crawled_at. Returns the source id.
    pub async fn ensure_source(
        &self,
        tx: &mut SqliteConnection,
        source: &Source,
        crawled_at: DateTime<Utc>,
    ) -> Result<i64, RegPulseError> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO sources (name, url, source_type, authority_type, jurisdiction,
                                 reliability_tier, last_crawled_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                reliability_tier = excluded.reliability_tier,
                last_crawled_at = excluded.last_crawled_at
            RETURNING id
            "#,
        )
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.source_type.as_str())
        .bind(source.authority_type.as_str())
        .bind(&source.jurisdiction)
        .bind(source.reliability_tier as i64)
        .bind(crawled_at)
        .bind(crawled_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        Ok(row.0)
    }

    /// Deduplicating upsert. Returns whether the input produced a new row,
    /// mutated an existing one, or was a no-op duplicate.
    pub async fn upsert_event(
        &self,
        tx: &mut SqliteConnection,
        input: &EventInput,
    ) -> Result<UpsertOutcome, RegPulseError> {
        let f = &input.finding;
        validate_scores(f)?;

        let incoming_key = regulation_key(
            &f.jurisdiction_country,
            f.jurisdiction_state.as_deref(),
            &f.title,
        );
        let incoming_url = normalize_url(&input.source_url_link);
        let raw_text = truncate_chars(&input.raw_text, RAW_TEXT_MAX_CHARS);
        let incoming_hash = text_hash(raw_text);
        let now = Utc::now();

        let candidates = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT id, title, jurisdiction_state, stage, summary, business_impact,
                   age_bracket, impact_score, likelihood_score, confidence_score,
                   chili_score, source_url_link, raw_text
            FROM regulation_events
            WHERE lower(jurisdiction_country) = lower(?)
              AND lower(COALESCE(jurisdiction_state, '')) = lower(?)
              AND (lower(title) = lower(?) OR lower(source_url_link) = lower(?))
            ORDER BY updated_at DESC
            "#,
        )
        .bind(&f.jurisdiction_country)
        .bind(f.jurisdiction_state.as_deref().unwrap_or(""))
        .bind(&f.title)
        .bind(&input.source_url_link)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let matched = candidates.into_iter().find(|c| {
            let candidate_key = regulation_key(
                &f.jurisdiction_country,
                c.jurisdiction_state.as_deref(),
                &c.title,
            );
            let candidate_url = normalize_url(&c.source_url_link);

            let urls_both_present = !candidate_url.is_empty() && !incoming_url.is_empty();
            if urls_both_present && candidate_url == incoming_url {
                return candidate_key == incoming_key;
            }
            // Distinct non-empty URLs are distinct events (P3); otherwise fall
            // back to content identity.
            if urls_both_present && candidate_url != incoming_url {
                return false;
            }
            let candidate_hash = text_hash(c.raw_text.as_deref().unwrap_or(""));
            candidate_hash == incoming_hash && candidate_key == incoming_key
        });

        let Some(existing) = matched else {
            return self.insert_event(tx, input, raw_text, now).await;
        };

        let stage_changed = existing.stage != f.stage.as_str();
        let changed = stage_changed
            || existing.summary != f.summary
            || existing.business_impact != f.business_impact
            || existing.age_bracket != f.age_bracket.as_str()
            || existing.impact_score != f.impact_score as i64
            || existing.likelihood_score != f.likelihood_score as i64
            || existing.confidence_score != f.confidence_score as i64
            || existing.chili_score != f.chili_score as i64;

        if !changed {
            return Ok(UpsertOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            UPDATE regulation_events SET
                stage = ?, is_under16_applicable = ?, age_bracket = ?,
                impact_score = ?, likelihood_score = ?, confidence_score = ?,
                chili_score = ?, summary = ?, business_impact = ?,
                required_solutions = ?, affected_products = ?, competitor_responses = ?,
                raw_text = ?, effective_date = ?, published_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(f.stage.as_str())
        .bind(f.is_under16_applicable)
        .bind(f.age_bracket.as_str())
        .bind(f.impact_score as i64)
        .bind(f.likelihood_score as i64)
        .bind(f.confidence_score as i64)
        .bind(f.chili_score as i64)
        .bind(&f.summary)
        .bind(&f.business_impact)
        .bind(to_json_list(&f.required_solutions))
        .bind(to_json_list(&f.affected_products))
        .bind(to_json_list(&f.competitor_responses))
        .bind(raw_text)
        .bind(f.effective_date.as_deref())
        .bind(f.published_date.as_deref())
        .bind(now)
        .bind(&existing.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        if stage_changed {
            self.append_history(
                tx,
                &existing.id,
                now,
                "status_changed",
                Some("stage"),
                Some(&existing.stage),
                Some(f.stage.as_str()),
            )
            .await?;
        } else {
            self.append_history(
                tx,
                &existing.id,
                now,
                "updated",
                Some("analysis"),
                None,
                Some("Pipeline refresh"),
            )
            .await?;
        }

        Ok(UpsertOutcome::Updated)
    }

    async fn insert_event(
        &self,
        tx: &mut SqliteConnection,
        input: &EventInput,
        raw_text: &str,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, RegPulseError> {
        let f = &input.finding;
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO regulation_events (
                id, title, jurisdiction_country, jurisdiction_state, stage,
                is_under16_applicable, age_bracket,
                impact_score, likelihood_score, confidence_score, chili_score,
                summary, business_impact,
                required_solutions, affected_products, competitor_responses,
                raw_text, source_url_link, effective_date, published_date,
                source_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&f.title)
        .bind(&f.jurisdiction_country)
        .bind(f.jurisdiction_state.as_deref())
        .bind(f.stage.as_str())
        .bind(f.is_under16_applicable)
        .bind(f.age_bracket.as_str())
        .bind(f.impact_score as i64)
        .bind(f.likelihood_score as i64)
        .bind(f.confidence_score as i64)
        .bind(f.chili_score as i64)
        .bind(&f.summary)
        .bind(&f.business_impact)
        .bind(to_json_list(&f.required_solutions))
        .bind(to_json_list(&f.affected_products))
        .bind(to_json_list(&f.competitor_responses))
        .bind(raw_text)
        .bind(&input.source_url_link)
        .bind(f.effective_date.as_deref())
        .bind(f.published_date.as_deref())
        .bind(input.source_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        self.append_history(tx, &id, now, "created", None, None, None)
            .await?;

        Ok(UpsertOutcome::New)
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_history(
        &self,
        tx: &mut SqliteConnection,
        event_id: &str,
        changed_at: DateTime<Utc>,
        change_type: &str,
        field_name: Option<&str>,
        previous_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Result<(), RegPulseError> {
        sqlx::query(
            r#"
            INSERT INTO event_history
                (event_id, changed_at, changed_by, change_type, field_name, previous_value, new_value)
            VALUES (?, ?, 'pipeline', ?, ?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(changed_at)
        .bind(change_type)
        .bind(field_name)
        .bind(previous_value)
        .bind(new_value)
        .execute(&mut *tx)
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;
        Ok(())
    }

    /// History for one event, newest first.
    pub async fn get_history(&self, event_id: &str) -> Result<Vec<HistoryRow>, RegPulseError> {
        sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, event_id, changed_at, changed_by, change_type,
                   field_name, previous_value, new_value
            FROM event_history
            WHERE event_id = ?
            ORDER BY changed_at DESC, id DESC
            "#,
        )
        .bind(event_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))
    }
}

fn validate_scores(f: &regpulse_common::RegulationFinding) -> Result<(), RegPulseError> {
    for (name, score) in [
        ("impact_score", f.impact_score),
        ("likelihood_score", f.likelihood_score),
        ("confidence_score", f.confidence_score),
        ("chili_score", f.chili_score),
    ] {
        if !(1..=5).contains(&score) {
            return Err(RegPulseError::Validation(format!(
                "{name} out of bounds: {score}"
            )));
        }
    }
    Ok(())
}

fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
