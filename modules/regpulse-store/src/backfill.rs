//! Law backfill: recompute the laws and law_updates tables from the
//! regulation events table. Destructive of the derived tables only, inside
//! one transaction; an abort preserves the prior state.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use tracing::info;

use crate::canon::{infer_canonical_law, score_law_name, CanonicalLaw, LawSignals};
use crate::Store;

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct BackfillSummary {
    pub laws: usize,
    pub law_updates: usize,
    pub merged_duplicates: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct BackfillEvent {
    id: String,
    title: String,
    jurisdiction_country: String,
    jurisdiction_state: Option<String>,
    stage: String,
    age_bracket: String,
    is_under16_applicable: bool,
    impact_score: i64,
    likelihood_score: i64,
    confidence_score: i64,
    chili_score: i64,
    summary: String,
    business_impact: String,
    raw_text: Option<String>,
    source_url_link: String,
    effective_date: Option<String>,
    published_date: Option<String>,
    updated_at: DateTime<Utc>,
    source_name: Option<String>,
    reliability_tier: Option<i64>,
}

impl BackfillEvent {
    /// published ?? effective ?? updated. (updated_at is NOT NULL, so the
    /// chain never has to reach created_at.)
    fn reference_date(&self) -> DateTime<Utc> {
        self.published_date
            .as_deref()
            .and_then(parse_flexible_date)
            .or_else(|| self.effective_date.as_deref().and_then(parse_flexible_date))
            .unwrap_or(self.updated_at)
    }
}

impl Store {
    /// Rebuild laws and law_updates from all events joined with sources.
    /// Idempotent; safe to run at startup, after each crawl, or on demand.
    pub async fn backfill_laws(&self) -> Result<BackfillSummary> {
        let now = Utc::now();

        let events = sqlx::query_as::<_, BackfillEvent>(
            r#"
            SELECT e.id, e.title, e.jurisdiction_country, e.jurisdiction_state,
                   e.stage, e.age_bracket, e.is_under16_applicable,
                   e.impact_score, e.likelihood_score, e.confidence_score, e.chili_score,
                   e.summary, e.business_impact, e.raw_text, e.source_url_link,
                   e.effective_date, e.published_date, e.updated_at,
                   s.name AS source_name, s.reliability_tier
            FROM regulation_events e
            LEFT JOIN sources s ON s.id = e.source_id
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let total_events = events.len();

        // Group by canonical key. BTreeMap keeps rebuild order deterministic.
        let mut groups: BTreeMap<String, Vec<(CanonicalLaw, BackfillEvent)>> = BTreeMap::new();
        for event in events {
            let canonical = infer_canonical_law(&LawSignals {
                title: &event.title,
                summary: Some(&event.summary),
                content: event.raw_text.as_deref(),
                jurisdiction_country: &event.jurisdiction_country,
                jurisdiction_state: event.jurisdiction_state.as_deref(),
            });
            groups
                .entry(canonical.law_key.clone())
                .or_default()
                .push((canonical, event));
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM law_updates").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM laws").execute(&mut *tx).await?;

        let mut summary = BackfillSummary {
            merged_duplicates: total_events - groups.len(),
            ..Default::default()
        };

        for (law_key, mut members) in groups {
            members.sort_by_key(|(_, e)| std::cmp::Reverse(e.reference_date()));

            let best = members
                .iter()
                .max_by(|(a, _), (b, _)| {
                    score_law_name(&a.law_name)
                        .cmp(&score_law_name(&b.law_name))
                        .then(b.law_name.len().cmp(&a.law_name.len()))
                })
                .expect("group is non-empty");
            let law_name = best.0.law_name.clone();
            let law_type = members
                .iter()
                .map(|(c, _)| c.law_type.as_str())
                .find(|t| *t != "law")
                .unwrap_or("law")
                .to_string();

            let newest = &members[0].1;
            let first_seen = members
                .iter()
                .map(|(_, e)| e.reference_date())
                .min()
                .expect("group is non-empty");
            let last_seen = members
                .iter()
                .map(|(_, e)| e.updated_at.max(e.reference_date()))
                .max()
                .expect("group is non-empty");
            let latest_effective = members
                .iter()
                .filter_map(|(_, e)| {
                    let raw = e.effective_date.as_deref()?;
                    Some((parse_flexible_date(raw)?, raw.to_string()))
                })
                .max_by_key(|(parsed, _)| *parsed)
                .map(|(_, raw)| raw);

            let risk_max = members
                .iter()
                .map(|(_, e)| e.chili_score)
                .max()
                .unwrap_or(0) as f64;
            let (weighted_sum, weight_sum) = members.iter().fold((0.0, 0.0), |(ws, w), (_, e)| {
                let age_days = (now - e.reference_date()).num_days();
                let weight = recency_weight(age_days);
                (ws + e.chili_score as f64 * weight, w + weight)
            });
            let risk_recent = if weight_sum > 0.0 {
                weighted_sum / weight_sum
            } else {
                risk_max
            };
            let risk_overall = members
                .iter()
                .map(|(_, e)| {
                    0.4 * e.chili_score as f64
                        + 0.3 * e.impact_score as f64
                        + 0.2 * e.likelihood_score as f64
                        + 0.1 * e.confidence_score as f64
                })
                .sum::<f64>()
                / members.len() as f64;

            let tiers: Vec<i64> = members.iter().filter_map(|(_, e)| e.reliability_tier).collect();
            let source_confidence = if tiers.is_empty() {
                0.0
            } else {
                tiers.iter().sum::<i64>() as f64 / tiers.len() as f64
            };

            let status = law_status(&newest.stage);

            let law_id = sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO laws (
                    law_key, law_name, jurisdiction_country, jurisdiction_state,
                    law_type, stage, status, first_seen_at, last_seen_at,
                    latest_effective_date, aggregate_risk_max,
                    aggregate_risk_recent_weighted, aggregate_risk_overall,
                    source_confidence, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&law_key)
            .bind(&law_name)
            .bind(&newest.jurisdiction_country)
            .bind(newest.jurisdiction_state.as_deref())
            .bind(&law_type)
            .bind(&newest.stage)
            .bind(status)
            .bind(first_seen)
            .bind(last_seen)
            .bind(latest_effective.as_deref())
            .bind(risk_max)
            .bind(risk_recent)
            .bind(risk_overall)
            .bind(source_confidence)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
            .0;

            for (_, event) in &members {
                let raw_metadata = json!({
                    "age_bracket": event.age_bracket,
                    "jurisdiction_country": event.jurisdiction_country,
                    "jurisdiction_state": event.jurisdiction_state,
                    "is_under16_applicable": event.is_under16_applicable,
                    "source_name": event.source_name,
                    "reliability_tier": event.reliability_tier,
                });

                sqlx::query(
                    r#"
                    INSERT INTO law_updates (
                        law_id, event_id, title, stage, summary, business_impact,
                        impact_score, likelihood_score, confidence_score, chili_score,
                        published_date, effective_date, source_url, raw_metadata, created_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(law_id)
                .bind(&event.id)
                .bind(&event.title)
                .bind(&event.stage)
                .bind(&event.summary)
                .bind(&event.business_impact)
                .bind(event.impact_score)
                .bind(event.likelihood_score)
                .bind(event.confidence_score)
                .bind(event.chili_score)
                .bind(event.published_date.as_deref())
                .bind(event.effective_date.as_deref())
                .bind(&event.source_url_link)
                .bind(raw_metadata.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;

                summary.law_updates += 1;
            }

            summary.laws += 1;
        }

        tx.commit().await?;

        info!(
            laws = summary.laws,
            law_updates = summary.law_updates,
            merged_duplicates = summary.merged_duplicates,
            "Law backfill complete"
        );
        Ok(summary)
    }
}

fn recency_weight(age_days: i64) -> f64 {
    match age_days {
        d if d <= 30 => 1.0,
        d if d <= 90 => 0.9,
        d if d <= 180 => 0.8,
        d if d <= 365 => 0.65,
        d if d <= 730 => 0.5,
        _ => 0.35,
    }
}

fn law_status(stage: &str) -> &'static str {
    match stage {
        "enacted" | "effective" => "active",
        "withdrawn" | "rejected" => "inactive",
        _ => "monitoring",
    }
}

/// Accepts RFC3339 timestamps or bare `YYYY-MM-DD` dates.
pub(crate) fn parse_flexible_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_weight_ladder() {
        assert_eq!(recency_weight(0), 1.0);
        assert_eq!(recency_weight(30), 1.0);
        assert_eq!(recency_weight(31), 0.9);
        assert_eq!(recency_weight(180), 0.8);
        assert_eq!(recency_weight(365), 0.65);
        assert_eq!(recency_weight(730), 0.5);
        assert_eq!(recency_weight(3000), 0.35);
    }

    #[test]
    fn flexible_date_parses_both_forms() {
        assert!(parse_flexible_date("2025-06-01").is_some());
        assert!(parse_flexible_date("2025-06-01T12:00:00Z").is_some());
        assert!(parse_flexible_date("June 1st").is_none());
    }

    #[test]
    fn status_derivation() {
        assert_eq!(law_status("enacted"), "active");
        assert_eq!(law_status("rejected"), "inactive");
        assert_eq!(law_status("proposed"), "monitoring");
    }
}
