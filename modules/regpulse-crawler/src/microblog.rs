//! Microblog recent-search fetcher. The API is aggressively rate-limited, so
//! this fetcher runs on a single worker with sleep pacing and exponential
//! backoff honoring Retry-After / x-rate-limit-reset.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use regpulse_common::{truncate_chars, Config, CrawledItem, Source};

const RECENT_SEARCH_URL: &str = "https://api.x.com/2/tweets/search/recent";
const MAX_RESULTS: u32 = 100;
const ITEM_TITLE_CAP_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct MicroblogTuning {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl MicroblogTuning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_millis(config.x_api_timeout_ms),
            max_retries: config.x_api_max_retries,
            base_backoff: Duration::from_millis(config.x_api_base_backoff_ms),
            max_backoff: Duration::from_millis(config.x_api_max_backoff_ms),
        }
    }
}

impl Default for MicroblogTuning {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 4,
            base_backoff: Duration::from_millis(1_500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    like_count: u64,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    name: String,
}

pub struct MicroblogFetcher {
    bearer_token: String,
    client: reqwest::Client,
    tuning: MicroblogTuning,
}

impl MicroblogFetcher {
    pub fn new(bearer_token: &str, tuning: MicroblogTuning) -> Self {
        Self {
            bearer_token: bearer_token.to_string(),
            client: reqwest::Client::builder()
                .timeout(tuning.timeout)
                .build()
                .expect("Failed to build HTTP client"),
            tuning,
        }
    }

    /// Run the source's stored query against recent search. One crawled item
    /// per tweet, tweet ids deduplicated within the response.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<CrawledItem>> {
        let query = source
            .search_keywords
            .as_deref()
            .context("Microblog source has no stored query")?;

        info!(source = %source.name, query, "Microblog search");

        let response = self.search_with_backoff(query).await?;

        let users: HashMap<&str, &User> = response
            .includes
            .as_ref()
            .map(|inc| inc.users.iter().map(|u| (u.id.as_str(), u)).collect())
            .unwrap_or_default();

        let now = Utc::now();
        let mut seen_ids = HashSet::new();
        let items: Vec<CrawledItem> = response
            .data
            .iter()
            .filter(|tweet| seen_ids.insert(tweet.id.clone()))
            .map(|tweet| {
                let user = tweet.author_id.as_deref().and_then(|id| users.get(id));
                let url = match user {
                    Some(u) if !u.username.is_empty() => {
                        format!("https://x.com/{}/status/{}", u.username, tweet.id)
                    }
                    _ => format!("https://x.com/i/web/status/{}", tweet.id),
                };
                let text = synthesize_text(tweet, user.copied(), &url);
                CrawledItem {
                    source: source.clone(),
                    url,
                    title: truncate_chars(&tweet.text, ITEM_TITLE_CAP_CHARS).to_string(),
                    text,
                    fetched_at: now,
                }
            })
            .collect();

        info!(source = %source.name, count = items.len(), "Microblog search complete");
        Ok(items)
    }

    async fn search_with_backoff(&self, query: &str) -> Result<SearchResponse> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .get(RECENT_SEARCH_URL)
                .bearer_auth(&self.bearer_token)
                .query(&[
                    ("query", query),
                    ("max_results", &MAX_RESULTS.to_string()),
                    ("tweet.fields", "created_at,author_id,public_metrics"),
                    ("expansions", "author_id"),
                ])
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<SearchResponse>()
                        .await
                        .context("Failed to parse recent-search response");
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = status == 408 || status == 429 || status >= 500;
                    if !retryable || attempt + 1 >= self.tuning.max_retries {
                        anyhow::bail!("Recent search returned {status} for query {query:?}");
                    }
                    let delay = self
                        .server_hinted_delay(&response)
                        .unwrap_or_else(|| self.backoff_delay(attempt));
                    warn!(status, attempt = attempt + 1, delay_ms = delay.as_millis() as u64,
                          "Rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt + 1 >= self.tuning.max_retries {
                        return Err(e).context(format!("Recent search failed for {query:?}"));
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(error = %e, attempt = attempt + 1, "Recent search error, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }

    /// Prefer the server's own hint: Retry-After seconds, then the epoch in
    /// x-rate-limit-reset.
    fn server_hinted_delay(&self, response: &reqwest::Response) -> Option<Duration> {
        let headers = response.headers();
        if let Some(seconds) = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            return Some(Duration::from_secs(seconds).min(self.tuning.max_backoff));
        }
        if let Some(reset_epoch) = headers
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
        {
            let wait = reset_epoch - Utc::now().timestamp();
            if wait > 0 {
                return Some(Duration::from_secs(wait as u64).min(self.tuning.max_backoff));
            }
        }
        None
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .tuning
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        // The configured cap bounds the final sleep, jitter included.
        (exp + jitter).min(self.tuning.max_backoff)
    }
}

/// One text block per tweet: author label, URL, timestamp, metrics, body.
fn synthesize_text(tweet: &Tweet, user: Option<&User>, url: &str) -> String {
    let author = match user {
        Some(u) if !u.name.is_empty() => format!("@{} ({})", u.username, u.name),
        Some(u) => format!("@{}", u.username),
        None => "unknown author".to_string(),
    };
    let metrics = tweet.public_metrics.as_ref().cloned().unwrap_or_default();
    format!(
        "{author} — {url}\n{} · {} likes · {} reposts · {} replies\n\n{}",
        tweet.created_at.as_deref().unwrap_or("undated"),
        metrics.like_count,
        metrics.retweet_count,
        metrics.reply_count,
        tweet.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet(id: &str, text: &str) -> Tweet {
        Tweet {
            id: id.to_string(),
            text: text.to_string(),
            created_at: Some("2026-07-01T12:00:00.000Z".to_string()),
            author_id: Some("u1".to_string()),
            public_metrics: Some(PublicMetrics {
                retweet_count: 2,
                reply_count: 1,
                like_count: 9,
            }),
        }
    }

    #[test]
    fn synthesized_text_carries_author_metrics_and_body() {
        let user = User {
            id: "u1".to_string(),
            username: "policywatch".to_string(),
            name: "Policy Watch".to_string(),
        };
        let t = tweet("123", "KOSA markup scheduled for Thursday");
        let text = synthesize_text(&t, Some(&user), "https://x.com/policywatch/status/123");
        assert!(text.contains("@policywatch (Policy Watch)"));
        assert!(text.contains("https://x.com/policywatch/status/123"));
        assert!(text.contains("9 likes"));
        assert!(text.contains("2 reposts"));
        assert!(text.contains("KOSA markup scheduled for Thursday"));
    }

    #[test]
    fn synthesized_text_tolerates_missing_author() {
        let t = Tweet {
            id: "9".to_string(),
            text: "body".to_string(),
            created_at: None,
            author_id: None,
            public_metrics: None,
        };
        let text = synthesize_text(&t, None, "https://x.com/i/web/status/9");
        assert!(text.starts_with("unknown author"));
        assert!(text.contains("undated"));
    }

    #[test]
    fn response_parsing_defaults_missing_fields() {
        let json = r#"{
            "data": [{"id": "1", "text": "hello"}],
            "meta": {"result_count": 1}
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert!(parsed.includes.is_none());
    }

    #[test]
    fn empty_response_parses() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.data.is_empty());
    }
}
