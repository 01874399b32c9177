//! LLM analyzer: one crawled item in, one validated regulation finding (or
//! an irrelevant verdict) out. The raw model output is normalized and
//! clamped here, at the boundary; nothing downstream touches it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use llm_client::Minimax;
use regpulse_common::{
    truncate_chars, AgeBracket, Analysis, Config, CrawledItem, RegulationFinding, Stage,
};

/// Item text is truncated to this many characters before prompting.
pub const ANALYSIS_TEXT_CAP_CHARS: usize = 8_000;
const MAX_TOKENS: u32 = 2_048;

const ANALYST_PROMPT: &str = r#"You are a regulatory analyst tracking laws that affect minors' use of online services (ages 13-18).

Given one crawled web item, decide whether it describes a regulation, bill, enforcement action, or policy change relevant to under-16 or teen online safety, privacy, or age assurance. Respond with ONLY a JSON object, no prose.

If the item is not about such regulation, respond: {"relevant": false}

Otherwise respond with:
{
  "relevant": true,
  "title": "short factual title of the regulatory development",
  "jurisdiction_country": "country (e.g. US, United Kingdom, European Union, Australia)",
  "jurisdiction_state": "state or region, or null",
  "stage": "one of: proposed, introduced, committee_review, passed, enacted, effective, amended, withdrawn, rejected",
  "is_under16_applicable": true or false,
  "age_bracket": "one of: 13-15, 16-18, both",
  "impact_score": 1-5,
  "likelihood_score": 1-5,
  "confidence_score": 1-5,
  "chili_score": 1-5 (urgency for a product/compliance team),
  "summary": "2-3 sentence factual summary",
  "business_impact": "1-2 sentences on what an affected platform must do",
  "required_solutions": ["concrete compliance measures"],
  "affected_products": ["product surfaces affected"],
  "competitor_responses": ["known public responses by platforms, or empty"],
  "effective_date": "YYYY-MM-DD or null",
  "published_date": "YYYY-MM-DD or null"
}

Scores are integers from 1 (minimal) to 5 (severe/certain/urgent). Do not invent dates; use null when the item does not state one."#;

// --- Analyzer seam ---

#[async_trait]
pub trait ItemAnalyzer: Send + Sync {
    /// `None` means the call itself failed and the item should be skipped;
    /// `Some(Analysis::Irrelevant)` is a successful negative verdict.
    async fn analyze(&self, item: &CrawledItem) -> Option<Analysis>;
}

pub struct LlmAnalyzer {
    llm: Minimax,
}

impl LlmAnalyzer {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        let mut llm = Minimax::new(api_key, model);
        if let Some(url) = base_url {
            llm = llm.with_base_url(url);
        }
        Self { llm }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.minimax_api_key,
            &config.analysis_model,
            config.minimax_api_url.as_deref(),
        )
    }
}

#[async_trait]
impl ItemAnalyzer for LlmAnalyzer {
    async fn analyze(&self, item: &CrawledItem) -> Option<Analysis> {
        let text = truncate_chars(&item.text, ANALYSIS_TEXT_CAP_CHARS);
        let prompt = format!(
            "{ANALYST_PROMPT}\n\nSource: {}\nURL: {}\nTitle: {}\n\n{text}",
            item.source.name, item.url, item.title
        );

        match self.llm.complete(&prompt, MAX_TOKENS).await {
            Ok(raw) => {
                debug!(url = %item.url, "Analyzer response received");
                Some(parse_analysis(&raw))
            }
            Err(e) => {
                warn!(url = %item.url, error = %e, "Analyzer call failed, skipping item");
                None
            }
        }
    }
}

// --- Response normalization ---

/// Parse and normalize one analyzer response. Never panics; anything
/// unparseable is an irrelevant verdict.
pub fn parse_analysis(raw: &str) -> Analysis {
    let Some(object) = parse_json_object(raw) else {
        return Analysis::Irrelevant;
    };

    if object.get("relevant").and_then(Value::as_bool) == Some(false) {
        return Analysis::Irrelevant;
    }

    let stage = object
        .get("stage")
        .and_then(Value::as_str)
        .map(Stage::parse_or_default)
        .unwrap_or(Stage::Proposed);
    let age_bracket = object
        .get("age_bracket")
        .and_then(Value::as_str)
        .map(AgeBracket::parse_or_default)
        .unwrap_or(AgeBracket::Both);

    Analysis::Relevant(RegulationFinding {
        title: str_field(&object, "title"),
        jurisdiction_country: str_field(&object, "jurisdiction_country"),
        jurisdiction_state: opt_str_field(&object, "jurisdiction_state"),
        stage,
        is_under16_applicable: object
            .get("is_under16_applicable")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        age_bracket,
        impact_score: clamp_score(object.get("impact_score")),
        likelihood_score: clamp_score(object.get("likelihood_score")),
        confidence_score: clamp_score(object.get("confidence_score")),
        chili_score: clamp_score(object.get("chili_score")),
        summary: str_field(&object, "summary"),
        business_impact: str_field(&object, "business_impact"),
        required_solutions: list_field(&object, "required_solutions"),
        affected_products: list_field(&object, "affected_products"),
        competitor_responses: list_field(&object, "competitor_responses"),
        effective_date: opt_str_field(&object, "effective_date"),
        published_date: opt_str_field(&object, "published_date"),
    })
}

/// Strip optional ```json fences, parse, and fall back to the first `{...}`
/// substring when the model wrapped the object in prose.
fn parse_json_object(raw: &str) -> Option<Value> {
    let trimmed = strip_code_fences(raw.trim());

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the fence line ("```json" or bare "```") and the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim().trim_end_matches("```").trim()
}

/// Clamp a score into integer [1..5], round-half-up, 3 when non-finite or
/// absent.
pub fn clamp_score(value: Option<&Value>) -> u8 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    };
    if !number.is_finite() {
        return 3;
    }
    (number + 0.5).floor().clamp(1.0, 5.0) as u8
}

fn str_field(object: &Value, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn opt_str_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string)
}

fn list_field(object: &Value, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
