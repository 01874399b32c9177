//! Crawl-run coordinator: owns the run lifecycle, fans the fetchers and the
//! analyzer out under fixed bounds, and serializes persistence into a single
//! transaction per run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use regpulse_common::{
    normalize_url, run_dedup_key, text_hash, Analysis, Config, CrawledItem, EventInput,
    RegPulseError, RegulationFinding, Source, SourceType, UpsertOutcome,
};
use regpulse_store::Store;

use crate::analyzer::{ItemAnalyzer, LlmAnalyzer};
use crate::feed::FeedFetcher;
use crate::microblog::{MicroblogFetcher, MicroblogTuning};
use crate::page::PageFetcher;
use crate::registry;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Parallelism for non-microblog sources.
    pub fetch_concurrency: usize,
    /// Parallelism for analyzer calls.
    pub analysis_concurrency: usize,
    /// Pacing between sequential microblog queries.
    pub microblog_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 5,
            analysis_concurrency: 12,
            microblog_delay: Duration::from_millis(1_500),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analysis_concurrency: config.analysis_concurrency,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineResult {
    pub run_id: i64,
    pub items_found: u32,
    pub items_new: u32,
    pub items_updated: u32,
    pub items_duplicate: u32,
    pub errors: Vec<String>,
}

impl std::fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Crawl Run {} Complete ===", self.run_id)?;
        writeln!(f, "Items found:     {}", self.items_found)?;
        writeln!(f, "Events new:      {}", self.items_new)?;
        writeln!(f, "Events updated:  {}", self.items_updated)?;
        writeln!(f, "Duplicates:      {}", self.items_duplicate)?;
        writeln!(f, "Errors:          {}", self.errors.len())?;
        Ok(())
    }
}

// --- Fetch seam ---

/// Best-effort fetch: failures are absorbed and return empty; they never
/// abort a crawl run.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Vec<CrawledItem>;
}

/// Production fetcher dispatching on source type.
pub struct WebFetcher {
    page: PageFetcher,
    feed: FeedFetcher,
    microblog: Option<MicroblogFetcher>,
}

impl WebFetcher {
    pub fn new(config: &Config) -> Self {
        let microblog = config
            .x_bearer_token
            .as_deref()
            .map(|token| MicroblogFetcher::new(token, MicroblogTuning::from_config(config)));
        Self {
            page: PageFetcher::new(),
            feed: FeedFetcher::new(),
            microblog,
        }
    }
}

#[async_trait]
impl SourceFetcher for WebFetcher {
    async fn fetch(&self, source: &Source) -> Vec<CrawledItem> {
        let result = match source.source_type {
            SourceType::GovernmentPage | SourceType::LegalDatabase => {
                self.page.fetch(source).await
            }
            SourceType::RssFeed | SourceType::NewsSearch => self.feed.fetch(source).await,
            SourceType::MicroblogSearch => match &self.microblog {
                Some(microblog) => microblog.fetch(source).await,
                None => {
                    debug!(source = %source.name, "No bearer token, skipping microblog source");
                    return Vec::new();
                }
            },
        };

        match result {
            Ok(items) => items,
            Err(e) => {
                warn!(source = %source.name, error = %e, "Source fetch failed, continuing");
                Vec::new()
            }
        }
    }
}

// --- Coordinator ---

pub struct Pipeline {
    store: Store,
    fetcher: Arc<dyn SourceFetcher>,
    analyzer: Arc<dyn ItemAnalyzer>,
    sources: Vec<Source>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Production pipeline over the full registry. Refuses to build without
    /// an analyzer key.
    pub fn new(store: Store, config: &Config) -> Result<Self, RegPulseError> {
        if config.minimax_api_key.is_empty() {
            return Err(RegPulseError::Config(
                "MINIMAX_API_KEY is required to start a crawl".to_string(),
            ));
        }
        Ok(Self {
            store,
            fetcher: Arc::new(WebFetcher::new(config)),
            analyzer: Arc::new(LlmAnalyzer::from_config(config)),
            sources: registry::registry(),
            options: PipelineOptions::from_config(config),
        })
    }

    /// Build a pipeline with pre-built seams (for testing).
    pub fn with_deps(
        store: Store,
        fetcher: Arc<dyn SourceFetcher>,
        analyzer: Arc<dyn ItemAnalyzer>,
        sources: Vec<Source>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            analyzer,
            sources,
            options,
        }
    }

    /// Run one full crawl. Per-source and per-item failures are absorbed;
    /// only orchestrator-level errors mark the run failed.
    pub async fn run(&self) -> Result<PipelineResult, RegPulseError> {
        let run = self.store.start_run().await?;

        match self.run_inner(run.id).await {
            Ok(result) => {
                self.store
                    .complete_run(
                        run.id,
                        result.items_found as i64,
                        result.items_new as i64,
                        result.items_updated as i64,
                    )
                    .await?;
                info!("{result}");

                if result.items_found > 0 {
                    // Post-completion side effects, outside the core
                    // transaction and best-effort.
                    if let Err(e) = self.store.seed_notifications(run.started_at).await {
                        warn!(error = %e, "Notification seeding failed");
                    }
                    if let Err(e) = self.store.backfill_laws().await {
                        warn!(error = %e, "Post-crawl law backfill failed");
                    }
                }
                Ok(result)
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.store.fail_run(run.id, &message).await.ok();
                Err(RegPulseError::Anyhow(e))
            }
        }
    }

    async fn run_inner(&self, run_id: i64) -> Result<PipelineResult> {
        let mut result = PipelineResult {
            run_id,
            ..Default::default()
        };

        let items = self.crawl_sources().await;
        result.items_found = items.len() as u32;
        if items.is_empty() {
            info!(run_id, "No items crawled, completing empty run");
            return Ok(result);
        }

        let analyzed = self.analyze_items(items).await;
        info!(run_id, relevant = analyzed.len(), "Analysis complete");

        self.persist(analyzed, &mut result).await?;
        Ok(result)
    }

    /// Crawl every registered source: non-microblog in bounded parallel
    /// batches, microblog strictly sequentially with pacing. Collapses
    /// within-run duplicates by (source, url) or (source, text hash).
    async fn crawl_sources(&self) -> Vec<CrawledItem> {
        let (microblog, regular): (Vec<&Source>, Vec<&Source>) = self
            .sources
            .iter()
            .partition(|s| s.source_type == SourceType::MicroblogSearch);

        let mut items: Vec<CrawledItem> = Vec::new();

        for batch in regular.chunks(self.options.fetch_concurrency.max(1)) {
            let fetched = join_all(batch.iter().map(|s| self.fetcher.fetch(s))).await;
            items.extend(fetched.into_iter().flatten());
        }

        for (i, source) in microblog.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.microblog_delay).await;
            }
            items.extend(self.fetcher.fetch(source).await);
        }

        let before = items.len();
        let mut seen = HashSet::new();
        items.retain(|item| {
            let url = normalize_url(&item.url);
            let identity = if url.is_empty() {
                format!("text:{}", text_hash(&item.text))
            } else {
                url
            };
            seen.insert(format!("{}\u{1}{identity}", item.source.name))
        });

        info!(
            sources = self.sources.len(),
            items = items.len(),
            collapsed = before - items.len(),
            "Crawl complete"
        );
        items
    }

    /// Analyze with bounded parallelism, wait-all per batch. Failed calls
    /// and irrelevant verdicts drop their items.
    async fn analyze_items(&self, items: Vec<CrawledItem>) -> Vec<(CrawledItem, RegulationFinding)> {
        let total = items.len();
        let mut analyzed = Vec::new();
        let mut processed = 0usize;

        for batch in items.chunks(self.options.analysis_concurrency.max(1)) {
            let verdicts = join_all(batch.iter().map(|item| self.analyzer.analyze(item))).await;
            for (item, verdict) in batch.iter().zip(verdicts) {
                processed += 1;
                match verdict {
                    Some(Analysis::Relevant(finding)) => analyzed.push((item.clone(), finding)),
                    Some(Analysis::Irrelevant) => {
                        debug!(url = %item.url, "Item not relevant, dropped")
                    }
                    None => debug!(url = %item.url, "Analyzer failed, dropped"),
                }
            }
            info!(processed, total, "Analysis progress");
        }

        analyzed
    }

    /// Persist all findings inside one transaction. Validation failures skip
    /// the offending event and land on the errors list; database failures
    /// abort the run.
    async fn persist(
        &self,
        analyzed: Vec<(CrawledItem, RegulationFinding)>,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .context("Failed to open persist transaction")?;
        let now = Utc::now();
        let mut seen_keys: HashSet<String> = HashSet::new();

        for (item, finding) in analyzed {
            let source_id = self
                .store
                .ensure_source(&mut tx, &item.source, now)
                .await
                .context("Failed to upsert source")?;

            let key = run_dedup_key(
                &finding.jurisdiction_country,
                finding.jurisdiction_state.as_deref(),
                &finding.title,
                &item.url,
                &item.text,
            );
            if !seen_keys.insert(key) {
                result.items_duplicate += 1;
                continue;
            }

            let input = EventInput {
                finding,
                raw_text: item.text,
                source_url_link: item.url,
                source_id,
            };
            match self.store.upsert_event(&mut tx, &input).await {
                Ok(UpsertOutcome::New) => result.items_new += 1,
                Ok(UpsertOutcome::Updated) => result.items_updated += 1,
                Ok(UpsertOutcome::Duplicate) => result.items_duplicate += 1,
                Err(RegPulseError::Validation(message)) => {
                    warn!(title = %input.finding.title, %message, "Event skipped");
                    result.errors.push(message);
                }
                Err(e) => return Err(anyhow::anyhow!(e).context("Event upsert failed")),
            }
        }

        tx.commit().await.context("Persist transaction failed")?;
        Ok(())
    }
}
