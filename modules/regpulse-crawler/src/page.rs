//! Single-shot page fetcher for government pages and legal databases.
//! Strips chrome and markup down to readable text, capped in size.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use regpulse_common::{collapse_ws, truncate_chars, CrawledItem, Source};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";
const BODY_CAP_CHARS: usize = 12_000;
const TITLE_CAP_CHARS: usize = 200;
/// Below this many stripped characters the page is assumed to be mostly
/// chrome, and metadata enrichment kicks in.
const THIN_TEXT_THRESHOLD: usize = 200;

static BLOCK_STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|nav|footer|header)\b.*?</(script|style|nav|footer|header)>")
        .expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(BROWSER_USER_AGENT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Fetch one page and reduce it to a single crawled item. Errors bubble
    /// up; the dispatcher absorbs them into an empty batch.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<CrawledItem>> {
        info!(url = %source.url, source = %source.name, "Fetching page");

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", source.url))?;

        if !response.status().is_success() {
            anyhow::bail!("GET {} returned {}", source.url, response.status());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", source.url))?;
        let body = truncate_chars(&body, BODY_CAP_CHARS * 4);

        let mut text = strip_html(body);
        if text.chars().count() < THIN_TEXT_THRESHOLD {
            text = enrich_thin_text(&text, body, source);
        }
        let text = truncate_chars(&text, BODY_CAP_CHARS).to_string();

        if text.is_empty() {
            anyhow::bail!("Empty text after stripping {}", source.url);
        }

        let title = extract_title(body).unwrap_or_else(|| source.name.clone());

        info!(url = %source.url, chars = text.len(), "Page fetched");

        Ok(vec![CrawledItem {
            source: source.clone(),
            url: source.url.clone(),
            title,
            text,
            fetched_at: Utc::now(),
        }])
    }
}

impl Default for PageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove script/style/nav/footer/header blocks and all tags, decode common
/// entities, collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let without_blocks = BLOCK_STRIP_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_blocks, " ");
    collapse_ws(&decode_entities(&without_tags))
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&mdash;", "\u{2014}")
        .replace("&rsquo;", "'")
}

/// `<title>` contents, entity-decoded and capped.
pub fn extract_title(html: &str) -> Option<String> {
    let caps = TITLE_RE.captures(html)?;
    let title = collapse_ws(&decode_entities(&caps[1]));
    if title.is_empty() {
        return None;
    }
    Some(truncate_chars(&title, TITLE_CAP_CHARS).to_string())
}

/// Pull a named meta tag's content attribute, tolerating either attribute
/// order.
pub fn extract_meta(html: &str, key: &str) -> Option<String> {
    let escaped = regex::escape(key);
    let patterns = [
        format!(
            r#"(?is)<meta[^>]+(?:property|name)\s*=\s*["']{escaped}["'][^>]+content\s*=\s*["']([^"']+)["']"#
        ),
        format!(
            r#"(?is)<meta[^>]+content\s*=\s*["']([^"']+)["'][^>]+(?:property|name)\s*=\s*["']{escaped}["']"#
        ),
    ];
    for pattern in patterns {
        if let Some(caps) = Regex::new(&pattern).ok()?.captures(html) {
            let value = collapse_ws(&decode_entities(&caps[1]));
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// JS-heavy pages often strip down to almost nothing. Concatenate whatever
/// descriptive metadata the page and the registry entry carry so the
/// analyzer has something to work with.
fn enrich_thin_text(stripped: &str, html: &str, source: &Source) -> String {
    warn!(url = %source.url, "Thin page text, enriching from metadata");
    let mut parts: Vec<String> = Vec::new();
    if !stripped.is_empty() {
        parts.push(stripped.to_string());
    }
    for key in ["og:description", "description", "og:title"] {
        if let Some(value) = extract_meta(html, key) {
            parts.push(value);
        }
    }
    parts.push(source.name.clone());
    if !source.description.is_empty() {
        parts.push(source.description.clone());
    }
    if let Some(keywords) = &source.search_keywords {
        parts.push(keywords.clone());
    }
    parts.join(" ")
}
