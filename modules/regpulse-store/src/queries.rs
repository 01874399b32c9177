//! Read surface for the dashboard and alert layer: brief, filtered event
//! pages, event detail, law list and law detail. All reads are best-effort
//! snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use regpulse_common::{RegPulseError, Stage};

use crate::canon::{infer_canonical_law, LawSignals};
use crate::events::{EventRow, HistoryRow};
use crate::Store;

pub const BRIEF_MAX_ITEMS: i64 = 20;
pub const EVENTS_MAX_PAGE_SIZE: i64 = 100;

// ---------------------------------------------------------------------------
// API models
// ---------------------------------------------------------------------------

/// Event as exposed to readers: list-valued fields parsed out of their
/// opaque JSON text, failing soft to null on malformed data.
#[derive(Debug, Clone, Serialize)]
pub struct ApiEvent {
    pub id: String,
    pub title: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    pub stage: String,
    pub stage_color: String,
    pub is_under16_applicable: bool,
    pub age_bracket: String,
    pub impact_score: i64,
    pub likelihood_score: i64,
    pub confidence_score: i64,
    pub chili_score: i64,
    pub summary: String,
    pub business_impact: String,
    pub required_solutions: Option<Vec<String>>,
    pub affected_products: Option<Vec<String>>,
    pub competitor_responses: Option<Vec<String>>,
    pub source_url_link: String,
    pub effective_date: Option<String>,
    pub published_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EventRow> for ApiEvent {
    fn from(row: EventRow) -> Self {
        Self {
            stage_color: stage_color(&row.stage).to_string(),
            id: row.id,
            title: row.title,
            jurisdiction_country: row.jurisdiction_country,
            jurisdiction_state: row.jurisdiction_state,
            stage: row.stage,
            is_under16_applicable: row.is_under16_applicable,
            age_bracket: row.age_bracket,
            impact_score: row.impact_score,
            likelihood_score: row.likelihood_score,
            confidence_score: row.confidence_score,
            chili_score: row.chili_score,
            summary: row.summary,
            business_impact: row.business_impact,
            required_solutions: parse_list(row.required_solutions.as_deref()),
            affected_products: parse_list(row.affected_products.as_deref()),
            competitor_responses: parse_list(row.competitor_responses.as_deref()),
            source_url_link: row.source_url_link,
            effective_date: row.effective_date,
            published_date: row.published_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LawRow {
    pub id: i64,
    pub law_key: String,
    pub law_name: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    pub law_type: String,
    pub stage: String,
    pub status: String,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub latest_effective_date: Option<String>,
    pub aggregate_risk_max: f64,
    pub aggregate_risk_recent_weighted: f64,
    pub aggregate_risk_overall: f64,
    pub source_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LawUpdateRow {
    pub id: i64,
    pub law_id: i64,
    pub event_id: String,
    pub title: String,
    pub stage: String,
    pub summary: Option<String>,
    pub business_impact: Option<String>,
    pub impact_score: Option<i64>,
    pub likelihood_score: Option<i64>,
    pub confidence_score: Option<i64>,
    pub chili_score: Option<i64>,
    pub published_date: Option<String>,
    pub effective_date: Option<String>,
    pub source_url: Option<String>,
    pub raw_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BriefItem {
    pub law_key: String,
    pub law_name: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    pub flag: String,
    pub stage: String,
    pub stage_color: String,
    pub age_bracket: String,
    pub aggregate_risk_max: f64,
    pub aggregate_risk_recent_weighted: f64,
    pub aggregate_risk_overall: f64,
    pub source_confidence: f64,
    pub update_count: i64,
    pub latest_summary: Option<String>,
    pub latest_effective_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Brief {
    pub generated_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub items: Vec<BriefItem>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub jurisdictions: Vec<String>,
    #[serde(default)]
    pub stages: Vec<String>,
    pub age_bracket: Option<String>,
    pub min_risk: Option<i64>,
    pub max_risk: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsPage {
    pub items: Vec<ApiEvent>,
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    pub event: ApiEvent,
    pub feedback: Vec<HistoryRow>,
    pub related_events: Vec<ApiEvent>,
    pub history: Vec<HistoryRow>,
    /// Identical to history; exposed separately for the timeline UX.
    pub timeline: Vec<HistoryRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LawTimelineEntry {
    pub date: Option<String>,
    pub stage: String,
    pub title: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LawDetail {
    pub law: LawRow,
    pub updates: Vec<LawUpdateRow>,
    pub timeline: Vec<LawTimelineEntry>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

impl Store {
    /// Executive brief: top laws by risk. Falls back to event-ordered items
    /// when the laws table has not been built yet.
    pub async fn brief(&self, limit: i64) -> Result<Brief, RegPulseError> {
        let limit = limit.clamp(1, BRIEF_MAX_ITEMS);

        let last_crawled_at = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
            "SELECT MAX(last_crawled_at) FROM sources",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?
        .0;

        let laws = sqlx::query_as::<_, LawRow>(
            r#"
            SELECT id, law_key, law_name, jurisdiction_country, jurisdiction_state,
                   law_type, stage, status, first_seen_at, last_seen_at,
                   latest_effective_date, aggregate_risk_max,
                   aggregate_risk_recent_weighted, aggregate_risk_overall,
                   source_confidence, created_at, updated_at
            FROM laws
            ORDER BY aggregate_risk_max DESC, aggregate_risk_recent_weighted DESC,
                     updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        if laws.is_empty() {
            let items = self.brief_from_events(limit).await?;
            return Ok(Brief {
                generated_at: Utc::now(),
                last_crawled_at,
                items,
            });
        }

        let mut items = Vec::with_capacity(laws.len());
        for law in laws {
            let latest = sqlx::query_as::<_, LawUpdateRow>(
                r#"
                SELECT id, law_id, event_id, title, stage, summary, business_impact,
                       impact_score, likelihood_score, confidence_score, chili_score,
                       published_date, effective_date, source_url, raw_metadata, created_at
                FROM law_updates
                WHERE law_id = ?
                ORDER BY published_date DESC, created_at DESC
                LIMIT 1
                "#,
            )
            .bind(law.id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

            let (update_count,) = sqlx::query_as::<_, (i64,)>(
                "SELECT COUNT(*) FROM law_updates WHERE law_id = ?",
            )
            .bind(law.id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

            let age_bracket = latest
                .as_ref()
                .and_then(|u| u.raw_metadata.as_deref())
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
                .and_then(|v| v.get("age_bracket").and_then(|b| b.as_str().map(String::from)))
                .unwrap_or_else(|| "both".to_string());

            items.push(BriefItem {
                flag: country_flag(&law.jurisdiction_country).to_string(),
                stage_color: stage_color(&law.stage).to_string(),
                age_bracket,
                latest_summary: latest.as_ref().and_then(|u| u.summary.clone()),
                latest_effective_date: law.latest_effective_date.clone(),
                law_key: law.law_key,
                law_name: law.law_name,
                jurisdiction_country: law.jurisdiction_country,
                jurisdiction_state: law.jurisdiction_state,
                stage: law.stage,
                aggregate_risk_max: law.aggregate_risk_max,
                aggregate_risk_recent_weighted: law.aggregate_risk_recent_weighted,
                aggregate_risk_overall: law.aggregate_risk_overall,
                source_confidence: law.source_confidence,
                update_count,
            });
        }

        Ok(Brief {
            generated_at: Utc::now(),
            last_crawled_at,
            items,
        })
    }

    /// Initial-deployment fallback: rank raw events the way the brief ranks
    /// laws and synthesize one item per event.
    async fn brief_from_events(&self, limit: i64) -> Result<Vec<BriefItem>, RegPulseError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, title, jurisdiction_country, jurisdiction_state, stage,
                   is_under16_applicable, age_bracket,
                   impact_score, likelihood_score, confidence_score, chili_score,
                   summary, business_impact, required_solutions, affected_products,
                   competitor_responses, raw_text, source_url_link,
                   effective_date, published_date, source_id, created_at, updated_at
            FROM regulation_events
            ORDER BY chili_score DESC, updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|e| {
                let canonical = infer_canonical_law(&LawSignals {
                    title: &e.title,
                    summary: Some(&e.summary),
                    content: e.raw_text.as_deref(),
                    jurisdiction_country: &e.jurisdiction_country,
                    jurisdiction_state: e.jurisdiction_state.as_deref(),
                });
                let overall = 0.4 * e.chili_score as f64
                    + 0.3 * e.impact_score as f64
                    + 0.2 * e.likelihood_score as f64
                    + 0.1 * e.confidence_score as f64;
                BriefItem {
                    law_key: canonical.law_key,
                    law_name: canonical.law_name,
                    flag: country_flag(&e.jurisdiction_country).to_string(),
                    stage_color: stage_color(&e.stage).to_string(),
                    jurisdiction_country: e.jurisdiction_country,
                    jurisdiction_state: e.jurisdiction_state,
                    stage: e.stage,
                    age_bracket: e.age_bracket,
                    aggregate_risk_max: e.chili_score as f64,
                    aggregate_risk_recent_weighted: e.chili_score as f64,
                    aggregate_risk_overall: overall,
                    source_confidence: 0.0,
                    update_count: 1,
                    latest_summary: Some(e.summary),
                    latest_effective_date: e.effective_date,
                }
            })
            .collect())
    }

    /// Paginated, filtered event list.
    pub async fn events_page(
        &self,
        filter: &EventFilter,
        page: i64,
        limit: i64,
    ) -> Result<EventsPage, RegPulseError> {
        let limit = limit.clamp(1, EVENTS_MAX_PAGE_SIZE);
        let page = page.max(1);

        let mut count_qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM regulation_events WHERE 1=1",
        );
        push_filters(&mut count_qb, filter);
        let (total,): (i64,) = count_qb
            .build_query_as()
            .fetch_one(self.pool())
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, title, jurisdiction_country, jurisdiction_state, stage,
                   is_under16_applicable, age_bracket,
                   impact_score, likelihood_score, confidence_score, chili_score,
                   summary, business_impact, required_solutions, affected_products,
                   competitor_responses, raw_text, source_url_link,
                   effective_date, published_date, source_id, created_at, updated_at
            FROM regulation_events WHERE 1=1
            "#,
        );
        push_filters(&mut qb, filter);

        // Sort columns are whitelisted; anything else falls back to updated_at.
        let sort_column = match filter.sort.as_deref() {
            Some("published_date") => "published_date",
            Some("chili_score") => "chili_score",
            Some("jurisdiction") => "jurisdiction_country",
            Some("stage") => "stage",
            Some("title") => "title",
            _ => "updated_at",
        };
        let direction = match filter.order.as_deref() {
            Some("asc") => "ASC",
            _ => "DESC",
        };
        qb.push(format!(" ORDER BY {sort_column} {direction}, updated_at DESC"));
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind((page - 1) * limit);

        let rows: Vec<EventRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };

        Ok(EventsPage {
            items: rows.into_iter().map(ApiEvent::from).collect(),
            page,
            total_pages,
            total,
        })
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<EventRow>, RegPulseError> {
        sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, title, jurisdiction_country, jurisdiction_state, stage,
                   is_under16_applicable, age_bracket,
                   impact_score, likelihood_score, confidence_score, chili_score,
                   summary, business_impact, required_solutions, affected_products,
                   competitor_responses, raw_text, source_url_link,
                   effective_date, published_date, source_id, created_at, updated_at
            FROM regulation_events
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))
    }

    /// Event with feedback, related events, history and timeline. `None`
    /// when the id does not exist (distinct from empty lists).
    pub async fn event_detail(&self, id: &str) -> Result<Option<EventDetail>, RegPulseError> {
        let Some(event) = self.get_event(id).await? else {
            return Ok(None);
        };

        let history = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, event_id, changed_at, changed_by, change_type,
                   field_name, previous_value, new_value
            FROM event_history
            WHERE event_id = ?
            ORDER BY changed_at DESC, id DESC
            LIMIT 50
            "#,
        )
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let feedback: Vec<HistoryRow> = history
            .iter()
            .filter(|h| h.change_type == "feedback")
            .cloned()
            .collect();

        let related = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, title, jurisdiction_country, jurisdiction_state, stage,
                   is_under16_applicable, age_bracket,
                   impact_score, likelihood_score, confidence_score, chili_score,
                   summary, business_impact, required_solutions, affected_products,
                   competitor_responses, raw_text, source_url_link,
                   effective_date, published_date, source_id, created_at, updated_at
            FROM regulation_events
            WHERE jurisdiction_country = ? AND id != ?
            ORDER BY chili_score DESC, updated_at DESC
            LIMIT 5
            "#,
        )
        .bind(&event.jurisdiction_country)
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        Ok(Some(EventDetail {
            event: ApiEvent::from(event),
            feedback,
            related_events: related.into_iter().map(ApiEvent::from).collect(),
            timeline: history.clone(),
            history,
        }))
    }

    pub async fn laws_list(
        &self,
        jurisdiction: Option<&str>,
        min_risk: Option<f64>,
    ) -> Result<Vec<LawRow>, RegPulseError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, law_key, law_name, jurisdiction_country, jurisdiction_state,
                   law_type, stage, status, first_seen_at, last_seen_at,
                   latest_effective_date, aggregate_risk_max,
                   aggregate_risk_recent_weighted, aggregate_risk_overall,
                   source_confidence, created_at, updated_at
            FROM laws WHERE 1=1
            "#,
        );
        if let Some(jurisdiction) = jurisdiction {
            qb.push(" AND lower(jurisdiction_country) = lower(");
            qb.push_bind(jurisdiction);
            qb.push(")");
        }
        if let Some(min_risk) = min_risk {
            qb.push(" AND aggregate_risk_max >= ");
            qb.push_bind(min_risk);
        }
        qb.push(
            " ORDER BY aggregate_risk_max DESC, aggregate_risk_recent_weighted DESC, updated_at DESC",
        );

        qb.build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(|e| RegPulseError::Database(e.to_string()))
    }

    /// Law with its updates (published_date DESC) and a derived timeline.
    pub async fn law_detail(&self, law_key: &str) -> Result<Option<LawDetail>, RegPulseError> {
        let Some(law) = sqlx::query_as::<_, LawRow>(
            r#"
            SELECT id, law_key, law_name, jurisdiction_country, jurisdiction_state,
                   law_type, stage, status, first_seen_at, last_seen_at,
                   latest_effective_date, aggregate_risk_max,
                   aggregate_risk_recent_weighted, aggregate_risk_overall,
                   source_confidence, created_at, updated_at
            FROM laws
            WHERE law_key = ?
            "#,
        )
        .bind(law_key)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let updates = sqlx::query_as::<_, LawUpdateRow>(
            r#"
            SELECT id, law_id, event_id, title, stage, summary, business_impact,
                   impact_score, likelihood_score, confidence_score, chili_score,
                   published_date, effective_date, source_url, raw_metadata, created_at
            FROM law_updates
            WHERE law_id = ?
            ORDER BY published_date DESC, created_at DESC
            "#,
        )
        .bind(law.id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| RegPulseError::Database(e.to_string()))?;

        let timeline = updates
            .iter()
            .map(|u| LawTimelineEntry {
                date: u
                    .published_date
                    .clone()
                    .or_else(|| u.effective_date.clone())
                    .or_else(|| Some(u.created_at.format("%Y-%m-%d").to_string())),
                stage: u.stage.clone(),
                title: u.title.clone(),
                summary: u.summary.clone(),
            })
            .collect();

        Ok(Some(LawDetail {
            law,
            updates,
            timeline,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter) {
    if !filter.jurisdictions.is_empty() {
        qb.push(" AND jurisdiction_country IN (");
        {
            let mut sep = qb.separated(", ");
            for jurisdiction in &filter.jurisdictions {
                sep.push_bind(jurisdiction.clone());
            }
        }
        qb.push(")");
    }
    if !filter.stages.is_empty() {
        qb.push(" AND stage IN (");
        {
            let mut sep = qb.separated(", ");
            for stage in &filter.stages {
                sep.push_bind(stage.clone());
            }
        }
        qb.push(")");
    }
    if let Some(age_bracket) = &filter.age_bracket {
        qb.push(" AND age_bracket = ");
        qb.push_bind(age_bracket.clone());
    }
    if let Some(min_risk) = filter.min_risk {
        qb.push(" AND chili_score >= ");
        qb.push_bind(min_risk);
    }
    if let Some(max_risk) = filter.max_risk {
        qb.push(" AND chili_score <= ");
        qb.push_bind(max_risk);
    }
    if let Some(date_from) = &filter.date_from {
        qb.push(" AND COALESCE(published_date, effective_date, date(updated_at)) >= ");
        qb.push_bind(date_from.clone());
    }
    if let Some(date_to) = &filter.date_to {
        qb.push(" AND COALESCE(published_date, effective_date, date(updated_at)) <= ");
        qb.push_bind(date_to.clone());
    }
    if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = format!("%{}%", q.trim());
        qb.push(" AND (title LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR summary LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR business_impact LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

fn parse_list(raw: Option<&str>) -> Option<Vec<String>> {
    serde_json::from_str(raw?).ok()
}

fn stage_color(stage: &str) -> &'static str {
    Stage::parse_strict(stage)
        .map(|s| s.color())
        .unwrap_or("#6b7280")
}

pub fn country_flag(country: &str) -> &'static str {
    match country.trim().to_lowercase().as_str() {
        "us" | "usa" | "united states" => "\u{1F1FA}\u{1F1F8}",
        "uk" | "united kingdom" | "great britain" => "\u{1F1EC}\u{1F1E7}",
        "eu" | "european union" => "\u{1F1EA}\u{1F1FA}",
        "australia" => "\u{1F1E6}\u{1F1FA}",
        "canada" => "\u{1F1E8}\u{1F1E6}",
        "france" => "\u{1F1EB}\u{1F1F7}",
        "germany" => "\u{1F1E9}\u{1F1EA}",
        "india" => "\u{1F1EE}\u{1F1F3}",
        "singapore" => "\u{1F1F8}\u{1F1EC}",
        "ireland" => "\u{1F1EE}\u{1F1EA}",
        _ => "\u{1F310}",
    }
}
