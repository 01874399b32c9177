//! Content-identity helpers shared by the fetchers, the pipeline and the
//! store. Dedup decisions everywhere go through these so the three layers
//! agree on what "the same item" means.

use sha1::{Digest, Sha1};

/// Collapse all runs of whitespace to a single space and trim.
pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// sha1 over whitespace-collapsed, lowercased text. Used for content
/// identity, not for anything cryptographic.
pub fn text_hash(text: &str) -> String {
    let normalized = collapse_ws(&text.to_lowercase());
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Lowercased, trimmed URL. Empty stays empty.
pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase()
}

/// The soft dedup key: `lower(country)|lower(state or "")|lower(title)`.
pub fn regulation_key(country: &str, state: Option<&str>, title: &str) -> String {
    format!(
        "{}|{}|{}",
        country.trim().to_lowercase(),
        state.unwrap_or("").trim().to_lowercase(),
        title.trim().to_lowercase()
    )
}

/// Run-level dedup key: regulation key plus URL identity, falling back to
/// content identity when the item has no URL.
pub fn run_dedup_key(
    country: &str,
    state: Option<&str>,
    title: &str,
    url: &str,
    raw_text: &str,
) -> String {
    let normalized = normalize_url(url);
    let identity = if normalized.is_empty() {
        format!("text:{}", text_hash(raw_text))
    } else {
        normalized
    };
    format!("{}::{}", regulation_key(country, state, title), identity)
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
