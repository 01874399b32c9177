//! RSS/Atom fetcher. Regex extraction of title, link and description from
//! item/entry blocks; feeds in the wild are too malformed for an XML parser.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use tracing::info;

use regpulse_common::{collapse_ws, truncate_chars, CrawledItem, Source};

use crate::page::{decode_entities, strip_html};

const MAX_ITEMS_PER_FEED: usize = 8;
const ITEM_TEXT_CAP_CHARS: usize = 4_000;

static RSS_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item[\s>].*?</item>").expect("valid regex"));
static ATOM_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<entry[\s>].*?</entry>").expect("valid regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static LINK_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link[^>]*href\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});
static LINK_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link[^>]*>([^<]+)</link>").expect("valid regex"));
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(description|summary|content)[^>]*>(.*?)</(description|summary|content)>")
        .expect("valid regex")
});
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Fetch a feed and return one item per entry. Items reuse the parent
    /// source so downstream joins keep working, with per-item URL and title.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<CrawledItem>> {
        info!(url = %source.url, source = %source.name, "Fetching feed");

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

        let items = parse_feed(&body, source);
        info!(url = %source.url, count = items.len(), "Feed fetched");
        Ok(items)
    }
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract up to [`MAX_ITEMS_PER_FEED`] entries from RSS `<item>` or Atom
/// `<entry>` blocks.
pub fn parse_feed(body: &str, source: &Source) -> Vec<CrawledItem> {
    let now = Utc::now();
    let blocks: Vec<&str> = RSS_ITEM_RE
        .find_iter(body)
        .chain(ATOM_ENTRY_RE.find_iter(body))
        .take(MAX_ITEMS_PER_FEED)
        .map(|m| m.as_str())
        .collect();

    blocks
        .into_iter()
        .filter_map(|block| {
            let title = TITLE_RE
                .captures(block)
                .map(|c| clean_fragment(&c[1]))
                .filter(|t| !t.is_empty())?;

            let url = LINK_HREF_RE
                .captures(block)
                .map(|c| c[1].trim().to_string())
                .or_else(|| LINK_TEXT_RE.captures(block).map(|c| c[1].trim().to_string()))
                .unwrap_or_default();

            let description = DESCRIPTION_RE
                .captures(block)
                .map(|c| clean_fragment(&c[2]))
                .unwrap_or_default();

            let text = if description.is_empty() {
                title.clone()
            } else {
                format!("{title}\n\n{description}")
            };

            Some(CrawledItem {
                source: source.clone(),
                url,
                title,
                text: truncate_chars(&text, ITEM_TEXT_CAP_CHARS).to_string(),
                fetched_at: now,
            })
        })
        .collect()
}

/// Unwrap CDATA, strip markup, decode entities, collapse whitespace.
fn clean_fragment(fragment: &str) -> String {
    let unwrapped = CDATA_RE.replace_all(fragment, "$1");
    collapse_ws(&decode_entities(&strip_html(&unwrapped)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regpulse_common::{AuthorityType, SourceType};

    fn feed_source() -> Source {
        Source {
            name: "FTC Press Releases".to_string(),
            url: "https://www.ftc.gov/feeds/press-release.xml".to_string(),
            source_type: SourceType::RssFeed,
            authority_type: AuthorityType::National,
            jurisdiction: "United States".to_string(),
            jurisdiction_country: "US".to_string(),
            jurisdiction_state: None,
            reliability_tier: 5,
            search_keywords: None,
            description: "FTC press feed".to_string(),
        }
    }

    #[test]
    fn parses_rss_items() {
        let body = r#"<rss><channel>
            <item>
                <title>FTC finalizes COPPA Rule amendments</title>
                <link>https://www.ftc.gov/news/a</link>
                <description><![CDATA[The <b>amended rule</b> takes effect in June.]]></description>
            </item>
            <item>
                <title>Second item</title>
                <link>https://www.ftc.gov/news/b</link>
            </item>
        </channel></rss>"#;
        let items = parse_feed(body, &feed_source());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "FTC finalizes COPPA Rule amendments");
        assert_eq!(items[0].url, "https://www.ftc.gov/news/a");
        assert!(items[0].text.contains("The amended rule takes effect in June."));
        assert_eq!(items[0].source.name, "FTC Press Releases");
    }

    #[test]
    fn parses_atom_entries_preferring_href() {
        let body = r#"<feed>
            <entry>
                <title>Ofcom consults on children's access assessments</title>
                <link rel="alternate" href="https://www.ofcom.org.uk/news/1"/>
                <summary>Consultation opens today.</summary>
            </entry>
        </feed>"#;
        let items = parse_feed(body, &feed_source());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://www.ofcom.org.uk/news/1");
        assert!(items[0].text.contains("Consultation opens today."));
    }

    #[test]
    fn caps_item_count() {
        let mut body = String::from("<rss>");
        for i in 0..20 {
            body.push_str(&format!(
                "<item><title>Item {i}</title><link>https://x/{i}</link></item>"
            ));
        }
        body.push_str("</rss>");
        let items = parse_feed(&body, &feed_source());
        assert_eq!(items.len(), MAX_ITEMS_PER_FEED);
    }

    #[test]
    fn skips_entries_without_titles() {
        let body = "<rss><item><link>https://x/untitled</link></item></rss>";
        assert!(parse_feed(body, &feed_source()).is_empty());
    }

    #[test]
    fn empty_body_yields_no_items() {
        assert!(parse_feed("", &feed_source()).is_empty());
    }
}
