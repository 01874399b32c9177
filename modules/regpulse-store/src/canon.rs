//! Canonical law inference. Pure functions from observed text to a stable
//! law identity; the backfill engine groups events by the key produced here.

use std::sync::LazyLock;

use regex::Regex;

/// Inputs the inferrer looks at, in priority order: title, then summary,
/// then content.
#[derive(Debug, Clone, Default)]
pub struct LawSignals<'a> {
    pub title: &'a str,
    pub summary: Option<&'a str>,
    pub content: Option<&'a str>,
    pub jurisdiction_country: &'a str,
    pub jurisdiction_state: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLaw {
    pub law_name: String,
    pub law_type: String,
    pub law_identifier: Option<String>,
    pub law_key: String,
}

static LAW_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([A-Z][\w'&\-]*(?:\s+[\w'&\-]+){0,11}?\s+(?:Act|Bill|Directive|Regulation|Code|Rule)(?:\s+(?:of\s+)?\d{4})?)",
    )
    .expect("valid regex")
});

static LAW_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(act|bill|directive|regulation|code|rule)s?\b").expect("valid regex")
});

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));

static KNOWN_ACRONYM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(COPPA|KOSA|GDPR|DSA|OSA|DPDP|PDPA|SCOPE|AADC)\b").expect("valid regex")
});

static BILL_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(SB|HB|AB|HR|SF|HF|LB|LD)\s*[-.]?\s*(\d{1,5})\b").expect("valid regex")
});

const LEADING_STOP_WORDS: &[&str] = &["the", "a", "this", "for", "to", "under", "potentially"];

const NARRATIVE_VERBS: &[&str] = &[
    "has", "is", "are", "introduced", "enacted", "issued", "setting", "claims", "alleging",
    "follows",
];

/// Map observed text to a canonical law identity. Deterministic in its
/// inputs; the same normalized inputs always produce the same key.
pub fn infer_canonical_law(signals: &LawSignals) -> CanonicalLaw {
    let texts: Vec<&str> = [Some(signals.title), signals.summary, signals.content]
        .into_iter()
        .flatten()
        .filter(|t| !t.trim().is_empty())
        .collect();

    // 1. Known-alias table, first matching text wins.
    for text in &texts {
        if let Some((name, law_type, id)) = match_alias(text, signals.jurisdiction_country) {
            return finish(signals, name, law_type, Some(id));
        }
    }

    // 2. Explicit law phrase, scored; an adjacent bill number becomes the
    // identifier.
    for text in &texts {
        if let Some((name, law_type)) = best_law_phrase(text) {
            let identifier = BILL_NUMBER_RE
                .captures(text)
                .map(|c| normalize_bill_number(&c[1], &c[2]));
            return finish(signals, name, law_type, identifier);
        }
    }

    // 3. Bill number with no surrounding law phrase.
    for text in &texts {
        if let Some(caps) = BILL_NUMBER_RE.captures(text) {
            let id = normalize_bill_number(&caps[1], &caps[2]);
            return finish(signals, format!("{id} Bill"), "bill".to_string(), Some(id));
        }
    }

    // 4. Subject-line fallback on the title alone.
    let (name, law_type) = subject_fallback(signals.title);
    finish(signals, name, law_type, None)
}

/// Scoring heuristic shared with the backfill engine's best-name selection.
pub fn score_law_name(name: &str) -> i32 {
    let words: Vec<&str> = name.split_whitespace().collect();
    let mut score = 0;

    if LAW_KEYWORD_RE.is_match(name) {
        score += 10;
    }
    if YEAR_RE.is_match(name) {
        score += 2;
    }
    if KNOWN_ACRONYM_RE.is_match(name) {
        score += 3;
    }
    if words
        .first()
        .map(|w| NARRATIVE_VERBS.contains(&w.to_lowercase().as_str()))
        .unwrap_or(false)
    {
        score -= 8;
    }
    if words.len() > 9 {
        score -= (words.len() - 9) as i32;
    }
    score
}

/// Lowercase, strip apostrophes, collapse non-alphanumerics to `-`, trim.
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// `slug(country):slug(state):slug(identifier-or-name)`. Empty jurisdiction
/// slugs to `global`.
pub fn law_key(country: &str, state: Option<&str>, identifier_or_name: &str) -> String {
    let country_slug = {
        let s = slug(country);
        if s.is_empty() {
            "global".to_string()
        } else {
            s
        }
    };
    format!(
        "{}:{}:{}",
        country_slug,
        slug(state.unwrap_or("")),
        slug(identifier_or_name)
    )
}

fn finish(
    signals: &LawSignals,
    law_name: String,
    law_type: String,
    law_identifier: Option<String>,
) -> CanonicalLaw {
    let key_basis = law_identifier.as_deref().unwrap_or(&law_name);
    let law_key = law_key(
        signals.jurisdiction_country,
        signals.jurisdiction_state,
        key_basis,
    );
    CanonicalLaw {
        law_name,
        law_type,
        law_identifier,
        law_key,
    }
}

// --- Alias table ---

fn match_alias(text: &str, country: &str) -> Option<(String, String, String)> {
    let lower = text.to_lowercase();
    let word = |needle: &str| {
        Regex::new(&format!(r"\b{needle}\b"))
            .map(|re| re.is_match(&lower))
            .unwrap_or(false)
    };

    if lower.contains("children's online privacy protection act")
        || lower.contains("childrens online privacy protection act")
        || word("coppa")
    {
        return Some(alias(
            "Children's Online Privacy Protection Act (COPPA)",
            "act",
            "COPPA",
        ));
    }
    if lower.contains("kids online safety act") || word("kosa") {
        return Some(alias("Kids Online Safety Act (KOSA)", "act", "KOSA"));
    }
    if lower.contains("age-appropriate design code act")
        || lower.contains("age appropriate design code act")
        || word(r"ab[-\s]?2273")
    {
        return Some(alias(
            "California Age-Appropriate Design Code Act",
            "act",
            "AB-2273",
        ));
    }
    if lower.contains("securing children online through parental empowerment")
        || lower.contains("scope act")
    {
        return Some(alias(
            "Securing Children Online through Parental Empowerment (SCOPE) Act",
            "act",
            "SCOPE-ACT",
        ));
    }
    // DSA is a heavily-overloaded acronym; only claim it under EU legal
    // context.
    if (lower.contains("digital services act") || word("dsa")) && eu_context(&lower, country) {
        return Some(alias("EU Digital Services Act (DSA)", "regulation", "EU-DSA"));
    }
    if lower.contains("online safety act") {
        let combined = format!("{lower} {}", country.to_lowercase());
        if combined.contains("united kingdom")
            || Regex::new(r"\buk\b").map(|re| re.is_match(&combined)).unwrap_or(false)
            || combined.contains("ofcom")
            || combined.contains("britain")
        {
            return Some(alias("UK Online Safety Act 2023", "act", "UK-OSA-2023"));
        }
        if combined.contains("australia") || combined.contains("esafety") {
            return Some(alias("Online Safety Act 2021 (Australia)", "act", "AU-OSA-2021"));
        }
        return Some(alias("Online Safety Act", "act", "OSA"));
    }
    if lower.contains("general data protection regulation") || word("gdpr") {
        return Some(alias(
            "General Data Protection Regulation (GDPR)",
            "regulation",
            "GDPR",
        ));
    }
    if lower.contains("digital personal data protection") || word("dpdp") {
        return Some(alias(
            "Digital Personal Data Protection Act (DPDP)",
            "act",
            "DPDP",
        ));
    }
    if lower.contains("personal data protection act") || word("pdpa") {
        return Some(alias("Personal Data Protection Act (PDPA)", "act", "PDPA"));
    }
    None
}

fn alias(name: &str, law_type: &str, id: &str) -> (String, String, String) {
    (name.to_string(), law_type.to_string(), id.to_string())
}

fn eu_context(lower_text: &str, country: &str) -> bool {
    let combined = format!("{lower_text} {}", country.to_lowercase());
    static EU_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(eu|european|commission|article 28|regulation|minors)\b")
            .expect("valid regex")
    });
    EU_RE.is_match(&combined)
}

// --- Explicit law phrase ---

fn best_law_phrase(text: &str) -> Option<(String, String)> {
    let mut candidates: Vec<String> = Vec::new();

    for cap in LAW_PHRASE_RE.captures_iter(text) {
        if let Some(cleaned) = clean_candidate(&cap[1]) {
            candidates.push(cleaned);
        }
    }

    candidates
        .into_iter()
        .max_by(|a, b| {
            score_law_name(a)
                .cmp(&score_law_name(b))
                // Ties break toward the shorter name.
                .then(b.len().cmp(&a.len()))
        })
        .map(|name| {
            let law_type = LAW_KEYWORD_RE
                .find_iter(&name)
                .last()
                .map(|m| m.as_str().to_lowercase().trim_end_matches('s').to_string())
                .unwrap_or_else(|| "law".to_string());
            (name, law_type)
        })
}

/// Strip leading stop-words; reject candidates whose head reads as narrative
/// rather than a statute name.
fn clean_candidate(phrase: &str) -> Option<String> {
    let mut words: Vec<&str> = phrase.split_whitespace().collect();

    while let Some(first) = words.first() {
        if LEADING_STOP_WORDS.contains(&first.to_lowercase().as_str()) {
            words.remove(0);
        } else {
            break;
        }
    }

    if words.len() < 2 {
        return None;
    }

    // Head = everything before the trailing law keyword (+ optional year).
    let head_end = words
        .iter()
        .rposition(|w| LAW_KEYWORD_RE.is_match(w))
        .unwrap_or(words.len());
    let head_has_narrative = words[..head_end]
        .iter()
        .any(|w| NARRATIVE_VERBS.contains(&w.to_lowercase().as_str()));
    if head_has_narrative {
        return None;
    }

    Some(words.join(" "))
}

fn normalize_bill_number(prefix: &str, digits: &str) -> String {
    format!("{}-{}", prefix.to_uppercase(), digits)
}

// --- Subject-line fallback ---

fn subject_fallback(title: &str) -> (String, String) {
    let lower = title.to_lowercase();
    if lower.contains("online safety") {
        return ("Child Online Safety Law".to_string(), "law".to_string());
    }
    if lower.contains("age verification") || lower.contains("age assurance") {
        return ("Age Verification Law".to_string(), "law".to_string());
    }
    if lower.contains("privacy")
        || lower.contains("data protection")
        || lower.contains("children's privacy")
    {
        return ("Child Data Privacy Law".to_string(), "law".to_string());
    }

    let words: Vec<String> = title
        .split_whitespace()
        .take(7)
        .map(title_case_word)
        .collect();
    if words.is_empty() {
        return ("Unspecified Law".to_string(), "law".to_string());
    }
    (words.join(" "), "law".to_string())
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals<'a>(title: &'a str, country: &'a str, state: Option<&'a str>) -> LawSignals<'a> {
        LawSignals {
            title,
            summary: None,
            content: None,
            jurisdiction_country: country,
            jurisdiction_state: state,
        }
    }

    #[test]
    fn coppa_alias_matches_title() {
        let law = infer_canonical_law(&signals(
            "FTC publishes COPPA Rule amendments",
            "US",
            None,
        ));
        assert_eq!(law.law_name, "Children's Online Privacy Protection Act (COPPA)");
        assert_eq!(law.law_identifier.as_deref(), Some("COPPA"));
        assert_eq!(law.law_key, "us::coppa");
    }

    #[test]
    fn inference_is_deterministic() {
        let a = infer_canonical_law(&signals("Kids Online Safety Act passes Senate", "US", None));
        let b = infer_canonical_law(&signals("Kids Online Safety Act passes Senate", "US", None));
        assert_eq!(a, b);
        assert_eq!(a.law_identifier.as_deref(), Some("KOSA"));
    }

    #[test]
    fn jurisdiction_distinguishes_keys_for_same_statute_text() {
        let us = infer_canonical_law(&signals(
            "Age-Appropriate Design Code Act enforcement",
            "US",
            Some("California"),
        ));
        let uk = infer_canonical_law(&signals(
            "Age-Appropriate Design Code Act enforcement",
            "United Kingdom",
            None,
        ));
        assert_ne!(us.law_key, uk.law_key);
        assert_eq!(us.law_key, "us:california:ab-2273");
    }

    #[test]
    fn dsa_without_eu_context_is_not_claimed() {
        let law = infer_canonical_law(&signals(
            "Company announces DSA compliance tooling for advertisers",
            "US",
            None,
        ));
        assert_ne!(law.law_identifier.as_deref(), Some("EU-DSA"));
    }

    #[test]
    fn dsa_with_eu_context_is_claimed() {
        let law = infer_canonical_law(&signals(
            "European Commission opens Article 28 proceedings under the DSA over minors",
            "European Union",
            None,
        ));
        assert_eq!(law.law_identifier.as_deref(), Some("EU-DSA"));
        assert_eq!(law.law_type, "regulation");
    }

    #[test]
    fn online_safety_act_branches_on_jurisdiction() {
        let uk = infer_canonical_law(&signals(
            "Ofcom publishes Online Safety Act codes of practice",
            "United Kingdom",
            None,
        ));
        assert_eq!(uk.law_identifier.as_deref(), Some("UK-OSA-2023"));

        let au = infer_canonical_law(&signals(
            "eSafety Commissioner enforces Online Safety Act",
            "Australia",
            None,
        ));
        assert_eq!(au.law_identifier.as_deref(), Some("AU-OSA-2021"));

        let generic = infer_canonical_law(&signals("Online Safety Act draft tabled", "Canada", None));
        assert_eq!(generic.law_identifier.as_deref(), Some("OSA"));
    }

    #[test]
    fn narrative_prefix_rejected_in_favor_of_subject_fallback() {
        let law = infer_canonical_law(&signals(
            "Potentially setting global standards for teen online safety",
            "US",
            None,
        ));
        assert_eq!(law.law_name, "Child Online Safety Law");
        assert!(!law.law_name.to_lowercase().contains("potentially"));
        assert!(!law.law_name.contains("Framework"));
    }

    #[test]
    fn explicit_law_phrase_with_bill_promotion() {
        let law = infer_canonical_law(&signals(
            "Social Media Youth Addiction Act advances as SB 976 clears committee",
            "US",
            Some("California"),
        ));
        assert_eq!(law.law_identifier.as_deref(), Some("SB-976"));
        assert!(law.law_name.contains("Act"));
        assert_eq!(law.law_key, "us:california:sb-976");
    }

    #[test]
    fn bill_only_fallback() {
        let law = infer_canonical_law(&signals(
            "Hearing scheduled on HB 18 next month",
            "US",
            Some("Texas"),
        ));
        assert_eq!(law.law_name, "HB-18 Bill");
        assert_eq!(law.law_type, "bill");
        assert_eq!(law.law_identifier.as_deref(), Some("HB-18"));
    }

    #[test]
    fn age_verification_subject_fallback() {
        let law = infer_canonical_law(&signals(
            "State weighs age verification requirements for app stores",
            "US",
            Some("Utah"),
        ));
        assert_eq!(law.law_name, "Age Verification Law");
    }

    #[test]
    fn generic_title_takes_first_seven_tokens() {
        let law = infer_canonical_law(&signals(
            "regulators weigh new obligations on recommender systems for teens",
            "US",
            None,
        ));
        assert_eq!(law.law_name, "Regulators Weigh New Obligations On Recommender Systems");
    }

    #[test]
    fn empty_jurisdiction_slugs_to_global() {
        let law = infer_canonical_law(&signals("COPPA enforcement roundup", "", None));
        assert!(law.law_key.starts_with("global:"));
    }

    #[test]
    fn slug_strips_apostrophes_and_collapses() {
        assert_eq!(slug("Children's Online Privacy"), "childrens-online-privacy");
        assert_eq!(slug("AB-2273"), "ab-2273");
        assert_eq!(slug("  United  Kingdom "), "united-kingdom");
    }

    #[test]
    fn scoring_prefers_law_keyword_and_penalizes_narrative() {
        assert!(score_law_name("Kids Online Safety Act") > score_law_name("Kids Online Safety"));
        assert!(
            score_law_name("Introduced Sweeping Online Rules")
                < score_law_name("Online Safety Act")
        );
    }

    #[test]
    fn ties_break_toward_shorter_name() {
        let long = "California Consumer Privacy And Device Protection Act";
        let short = "Device Protection Act";
        assert_eq!(score_law_name(long), score_law_name(short));
        let text = format!("{long} amends the {short}");
        let (name, _) = best_law_phrase(&text).unwrap();
        assert_eq!(name, short);
    }
}
