//! Integration tests for the deduplicating event store, on in-memory SQLite.

use chrono::Utc;
use regpulse_common::{
    AgeBracket, AuthorityType, EventInput, RegPulseError, RegulationFinding, Source, SourceType,
    Stage, UpsertOutcome,
};
use regpulse_store::Store;

async fn test_store() -> Store {
    Store::connect(":memory:").await.expect("in-memory store")
}

fn ftc_source() -> Source {
    Source {
        name: "FTC".to_string(),
        url: "https://www.ftc.gov".to_string(),
        source_type: SourceType::GovernmentPage,
        authority_type: AuthorityType::National,
        jurisdiction: "United States".to_string(),
        jurisdiction_country: "US".to_string(),
        jurisdiction_state: None,
        reliability_tier: 5,
        search_keywords: None,
        description: "Federal Trade Commission".to_string(),
    }
}

async fn seed_source(store: &Store, source: &Source) -> i64 {
    let mut tx = store.pool().begin().await.unwrap();
    let id = store.ensure_source(&mut tx, source, Utc::now()).await.unwrap();
    tx.commit().await.unwrap();
    id
}

fn finding(title: &str, stage: Stage, chili: u8) -> RegulationFinding {
    RegulationFinding {
        title: title.to_string(),
        jurisdiction_country: "US".to_string(),
        jurisdiction_state: None,
        stage,
        is_under16_applicable: true,
        age_bracket: AgeBracket::Both,
        impact_score: 4,
        likelihood_score: 4,
        confidence_score: 5,
        chili_score: chili,
        summary: "Amendments to the rule were published.".to_string(),
        business_impact: "Consent flows must change.".to_string(),
        required_solutions: vec!["verifiable parental consent".to_string()],
        affected_products: vec![],
        competitor_responses: vec![],
        effective_date: None,
        published_date: Some("2026-07-01".to_string()),
    }
}

fn input(finding: RegulationFinding, url: &str, source_id: i64) -> EventInput {
    EventInput {
        finding,
        raw_text: "The FTC today announced amendments to the COPPA Rule.".to_string(),
        source_url_link: url.to_string(),
        source_id,
    }
}

async fn upsert(store: &Store, input: &EventInput) -> UpsertOutcome {
    let mut tx = store.pool().begin().await.unwrap();
    let outcome = store.upsert_event(&mut tx, input).await.unwrap();
    tx.commit().await.unwrap();
    outcome
}

async fn event_count(store: &Store) -> i64 {
    sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM regulation_events")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .0
}

async fn history_count(store: &Store) -> i64 {
    sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM event_history")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .0
}

async fn only_event_id(store: &Store) -> String {
    sqlx::query_as::<_, (String,)>("SELECT id FROM regulation_events")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .0
}

// =========================================================================
// First observation, dedup, change detection
// =========================================================================

#[tokio::test]
async fn first_observation_inserts_with_created_history() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    let outcome = upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;

    assert_eq!(outcome, UpsertOutcome::New);
    assert_eq!(event_count(&store).await, 1);

    let event_id = only_event_id(&store).await;
    let history = store.get_history(&event_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_type, "created");
}

#[tokio::test]
async fn identical_replay_is_duplicate_and_writes_nothing() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;
    let event = input(
        finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
        "https://www.ftc.gov/a",
        source_id,
    );

    assert_eq!(upsert(&store, &event).await, UpsertOutcome::New);
    assert_eq!(upsert(&store, &event).await, UpsertOutcome::Duplicate);

    assert_eq!(event_count(&store).await, 1);
    assert_eq!(history_count(&store).await, 1);
}

#[tokio::test]
async fn stage_change_updates_row_and_appends_status_history() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;

    let outcome = upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Enacted, 5),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;
    assert_eq!(outcome, UpsertOutcome::Updated);
    assert_eq!(event_count(&store).await, 1);

    let event_id = only_event_id(&store).await;
    let event = store.get_event(&event_id).await.unwrap().unwrap();
    assert_eq!(event.stage, "enacted");
    assert_eq!(event.chili_score, 5);

    let history = store.get_history(&event_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change_type, "status_changed");
    assert_eq!(history[0].field_name.as_deref(), Some("stage"));
    assert_eq!(history[0].previous_value.as_deref(), Some("proposed"));
    assert_eq!(history[0].new_value.as_deref(), Some("enacted"));
}

#[tokio::test]
async fn non_stage_change_appends_analysis_refresh_history() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;

    let mut changed = finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4);
    changed.summary = "Revised summary after comment period.".to_string();
    let outcome = upsert(&store, &input(changed, "https://www.ftc.gov/a", source_id)).await;

    assert_eq!(outcome, UpsertOutcome::Updated);
    let event_id = only_event_id(&store).await;
    let history = store.get_history(&event_id).await.unwrap();
    assert_eq!(history[0].change_type, "updated");
    assert_eq!(history[0].field_name.as_deref(), Some("analysis"));
    assert_eq!(history[0].new_value.as_deref(), Some("Pipeline refresh"));
}

#[tokio::test]
async fn distinct_urls_stay_distinct_rows() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;
    let title = "FTC publishes COPPA Rule amendments";

    assert_eq!(
        upsert(
            &store,
            &input(finding(title, Stage::Proposed, 4), "https://www.ftc.gov/a", source_id)
        )
        .await,
        UpsertOutcome::New
    );
    assert_eq!(
        upsert(
            &store,
            &input(finding(title, Stage::Proposed, 4), "https://www.ftc.gov/b", source_id)
        )
        .await,
        UpsertOutcome::New
    );

    assert_eq!(event_count(&store).await, 2);
}

#[tokio::test]
async fn url_match_is_case_insensitive() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;
    let title = "FTC publishes COPPA Rule amendments";

    upsert(
        &store,
        &input(finding(title, Stage::Proposed, 4), "https://www.ftc.gov/A", source_id),
    )
    .await;
    let outcome = upsert(
        &store,
        &input(finding(title, Stage::Proposed, 4), "https://www.FTC.gov/a", source_id),
    )
    .await;

    assert_eq!(outcome, UpsertOutcome::Duplicate);
    assert_eq!(event_count(&store).await, 1);
}

#[tokio::test]
async fn empty_urls_dedup_by_content_hash() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;
    let event = input(
        finding("Senate hearing on teen safety", Stage::Proposed, 3),
        "",
        source_id,
    );

    assert_eq!(upsert(&store, &event).await, UpsertOutcome::New);
    assert_eq!(upsert(&store, &event).await, UpsertOutcome::Duplicate);
    assert_eq!(event_count(&store).await, 1);
}

// =========================================================================
// Bounds and validation
// =========================================================================

#[tokio::test]
async fn raw_text_is_capped_at_five_thousand_chars() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    let mut event = input(
        finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
        "https://www.ftc.gov/a",
        source_id,
    );
    event.raw_text = "x".repeat(8_000);
    upsert(&store, &event).await;

    let (stored,): (String,) =
        sqlx::query_as("SELECT raw_text FROM regulation_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(stored.chars().count(), 5_000);
}

#[tokio::test]
async fn out_of_bounds_score_is_rejected() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    let mut bad = finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4);
    bad.chili_score = 9;

    let mut tx = store.pool().begin().await.unwrap();
    let result = store
        .upsert_event(&mut tx, &input(bad, "https://www.ftc.gov/a", source_id))
        .await;
    drop(tx);

    assert!(matches!(result, Err(RegPulseError::Validation(_))));
    assert_eq!(event_count(&store).await, 0);
}

// =========================================================================
// History invariants
// =========================================================================

#[tokio::test]
async fn oldest_history_row_is_always_created() {
    let store = test_store().await;
    let source_id = seed_source(&store, &ftc_source()).await;

    upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Proposed, 4),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;
    upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Introduced, 4),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;
    upsert(
        &store,
        &input(
            finding("FTC publishes COPPA Rule amendments", Stage::Enacted, 5),
            "https://www.ftc.gov/a",
            source_id,
        ),
    )
    .await;

    let event_id = only_event_id(&store).await;
    let history = store.get_history(&event_id).await.unwrap();
    assert_eq!(history.len(), 3);
    // Newest first; the chronologically first row is `created`.
    assert_eq!(history.last().unwrap().change_type, "created");
    // Ordered (changed_at DESC, id DESC): ids never ascend.
    for pair in history.windows(2) {
        assert!(pair[0].id > pair[1].id);
    }
}

#[tokio::test]
async fn ensure_source_upserts_by_name() {
    let store = test_store().await;
    let first = seed_source(&store, &ftc_source()).await;

    let mut updated = ftc_source();
    updated.reliability_tier = 4;
    let second = seed_source(&store, &updated).await;

    assert_eq!(first, second);
    let (tier, last_crawled): (i64, Option<chrono::DateTime<Utc>>) = sqlx::query_as(
        "SELECT reliability_tier, last_crawled_at FROM sources WHERE id = ?",
    )
    .bind(first)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(tier, 4);
    assert!(last_crawled.is_some());
}
