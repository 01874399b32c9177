//! End-to-end coordinator tests with mock fetcher/analyzer seams and an
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use regpulse_common::{
    AgeBracket, Analysis, AuthorityType, CrawledItem, RegPulseError, RegulationFinding, Source,
    SourceType, Stage,
};
use regpulse_crawler::{ItemAnalyzer, Pipeline, PipelineOptions, SourceFetcher};
use regpulse_store::Store;

fn page_source(name: &str, url: &str) -> Source {
    Source {
        name: name.to_string(),
        url: url.to_string(),
        source_type: SourceType::GovernmentPage,
        authority_type: AuthorityType::National,
        jurisdiction: "United States".to_string(),
        jurisdiction_country: "US".to_string(),
        jurisdiction_state: None,
        reliability_tier: 5,
        search_keywords: None,
        description: String::new(),
    }
}

fn item(source: &Source, url: &str, title: &str, text: &str) -> CrawledItem {
    CrawledItem {
        source: source.clone(),
        url: url.to_string(),
        title: title.to_string(),
        text: text.to_string(),
        fetched_at: Utc::now(),
    }
}

/// Fetcher that hands out canned items per source name.
struct StaticFetcher {
    items: Vec<CrawledItem>,
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, source: &Source) -> Vec<CrawledItem> {
        self.items
            .iter()
            .filter(|i| i.source.name == source.name)
            .cloned()
            .collect()
    }
}

/// Analyzer that marks items relevant unless their text says otherwise, and
/// simulates failures on demand.
struct KeywordAnalyzer {
    chili: u8,
}

#[async_trait]
impl ItemAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, item: &CrawledItem) -> Option<Analysis> {
        if item.text.contains("analyzer-down") {
            return None;
        }
        if item.text.contains("irrelevant") {
            return Some(Analysis::Irrelevant);
        }
        Some(Analysis::Relevant(RegulationFinding {
            title: item.title.clone(),
            jurisdiction_country: item.source.jurisdiction_country.clone(),
            jurisdiction_state: item.source.jurisdiction_state.clone(),
            stage: Stage::Proposed,
            is_under16_applicable: true,
            age_bracket: AgeBracket::Both,
            impact_score: 4,
            likelihood_score: 3,
            confidence_score: 4,
            chili_score: self.chili,
            summary: format!("{} summary", item.title),
            business_impact: "Impact".to_string(),
            required_solutions: vec![],
            affected_products: vec![],
            competitor_responses: vec![],
            effective_date: None,
            published_date: None,
        }))
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        fetch_concurrency: 2,
        analysis_concurrency: 4,
        microblog_delay: Duration::from_millis(1),
    }
}

async fn test_store() -> Store {
    Store::connect(":memory:").await.expect("in-memory store")
}

#[tokio::test]
async fn full_run_persists_events_and_completes() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");
    let ofcom = page_source("Ofcom", "https://www.ofcom.org.uk");

    let fetcher = StaticFetcher {
        items: vec![
            item(
                &ftc,
                "https://www.ftc.gov/a",
                "FTC publishes COPPA Rule amendments",
                "The FTC announced amendments.",
            ),
            item(
                &ofcom,
                "https://www.ofcom.org.uk/a",
                "Ofcom Online Safety Act codes",
                "Codes of practice published.",
            ),
            item(
                &ofcom,
                "https://www.ofcom.org.uk/b",
                "Press office contact details",
                "This page is irrelevant chrome.",
            ),
        ],
    };

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(fetcher),
        Arc::new(KeywordAnalyzer { chili: 4 }),
        vec![ftc, ofcom],
        options(),
    );

    let result = pipeline.run().await.unwrap();
    assert_eq!(result.items_found, 3);
    assert_eq!(result.items_new, 2);
    assert_eq!(result.items_updated, 0);
    assert!(result.errors.is_empty());

    let run = store.latest_run().await.unwrap().unwrap();
    assert_eq!(run.status, "completed");
    assert_eq!(run.items_found, 3);
    assert_eq!(run.items_new, 2);

    let (event_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM regulation_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(event_count, 2);

    // Post-completion backfill ran.
    let laws = store.laws_list(None, None).await.unwrap();
    assert!(!laws.is_empty());

    // chili 4 events were seeded as notifications.
    let (notif_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(notif_count, 2);
}

#[tokio::test]
async fn rerun_is_all_duplicates() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");
    let fetcher = Arc::new(StaticFetcher {
        items: vec![item(
            &ftc,
            "https://www.ftc.gov/a",
            "FTC publishes COPPA Rule amendments",
            "The FTC announced amendments.",
        )],
    });
    let analyzer = Arc::new(KeywordAnalyzer { chili: 3 });

    let pipeline = Pipeline::with_deps(
        store.clone(),
        fetcher.clone(),
        analyzer.clone(),
        vec![ftc.clone()],
        options(),
    );

    let first = pipeline.run().await.unwrap();
    assert_eq!(first.items_new, 1);

    let second = pipeline.run().await.unwrap();
    assert_eq!(second.items_new, 0);
    assert_eq!(second.items_duplicate, 1);
}

#[tokio::test]
async fn within_run_repeats_collapse_before_upsert() {
    let store = test_store().await;
    let a = page_source("Source A", "https://a.example");
    let b = page_source("Source B", "https://b.example");

    // Same story surfaced by two sources with the same URL: the output dedup
    // keys on (source, url), so both survive the crawl; the run-level
    // regulation-key dedup then collapses them before upsert.
    let fetcher = StaticFetcher {
        items: vec![
            item(&a, "https://news.example/story", "Teen Safety Bill advances", "Body"),
            item(&b, "https://news.example/story", "Teen Safety Bill advances", "Body"),
        ],
    };

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(fetcher),
        Arc::new(KeywordAnalyzer { chili: 3 }),
        vec![a, b],
        options(),
    );

    let result = pipeline.run().await.unwrap();
    assert_eq!(result.items_found, 2);
    assert_eq!(result.items_new, 1);
    assert_eq!(result.items_duplicate, 1);
}

#[tokio::test]
async fn zero_items_completes_with_empty_counts() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(StaticFetcher { items: vec![] }),
        Arc::new(KeywordAnalyzer { chili: 3 }),
        vec![ftc],
        options(),
    );

    let result = pipeline.run().await.unwrap();
    assert_eq!(result.items_found, 0);
    assert_eq!(result.items_new, 0);

    let run = store.latest_run().await.unwrap().unwrap();
    assert_eq!(run.status, "completed");
    assert_eq!(run.items_found, 0);
}

#[tokio::test]
async fn analyzer_failures_drop_items_without_failing_the_run() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");

    let fetcher = StaticFetcher {
        items: vec![
            item(&ftc, "https://www.ftc.gov/a", "Good item", "Body"),
            item(&ftc, "https://www.ftc.gov/b", "Broken item", "analyzer-down"),
        ],
    };

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(fetcher),
        Arc::new(KeywordAnalyzer { chili: 3 }),
        vec![ftc],
        options(),
    );

    let result = pipeline.run().await.unwrap();
    assert_eq!(result.items_found, 2);
    assert_eq!(result.items_new, 1);
    assert_eq!(store.latest_run().await.unwrap().unwrap().status, "completed");
}

#[tokio::test]
async fn trigger_conflicts_while_another_run_is_in_flight() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");

    // Simulate an in-flight run holding the gate.
    store.start_run().await.unwrap();

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(StaticFetcher { items: vec![] }),
        Arc::new(KeywordAnalyzer { chili: 3 }),
        vec![ftc],
        options(),
    );

    let result = pipeline.run().await;
    assert!(matches!(result, Err(RegPulseError::CrawlConflict)));

    let (running,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM crawl_runs WHERE status = 'running'")
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(running, 1);
}

#[tokio::test]
async fn validation_failures_land_on_the_errors_list() {
    let store = test_store().await;
    let ftc = page_source("FTC", "https://www.ftc.gov");

    struct OutOfBoundsAnalyzer;
    #[async_trait]
    impl ItemAnalyzer for OutOfBoundsAnalyzer {
        async fn analyze(&self, item: &CrawledItem) -> Option<Analysis> {
            Some(Analysis::Relevant(RegulationFinding {
                title: item.title.clone(),
                jurisdiction_country: "US".to_string(),
                jurisdiction_state: None,
                stage: Stage::Proposed,
                is_under16_applicable: true,
                age_bracket: AgeBracket::Both,
                impact_score: 4,
                likelihood_score: 3,
                confidence_score: 4,
                // An external edit path could hand the store a raw score;
                // the store guards its own bounds.
                chili_score: 9,
                summary: String::new(),
                business_impact: String::new(),
                required_solutions: vec![],
                affected_products: vec![],
                competitor_responses: vec![],
                effective_date: None,
                published_date: None,
            }))
        }
    }

    let fetcher = StaticFetcher {
        items: vec![item(&ftc, "https://www.ftc.gov/a", "Bad scores", "Body")],
    };

    let pipeline = Pipeline::with_deps(
        store.clone(),
        Arc::new(fetcher),
        Arc::new(OutOfBoundsAnalyzer),
        vec![ftc],
        options(),
    );

    let result = pipeline.run().await.unwrap();
    assert_eq!(result.items_new, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("chili_score"));
    assert_eq!(store.latest_run().await.unwrap().unwrap().status, "completed");
}
