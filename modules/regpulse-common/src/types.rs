use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    GovernmentPage,
    RssFeed,
    NewsSearch,
    LegalDatabase,
    MicroblogSearch,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::GovernmentPage => "government_page",
            SourceType::RssFeed => "rss_feed",
            SourceType::NewsSearch => "news_search",
            SourceType::LegalDatabase => "legal_database",
            SourceType::MicroblogSearch => "microblog_search",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityType {
    National,
    State,
    Local,
    Supranational,
}

impl AuthorityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityType::National => "national",
            AuthorityType::State => "state",
            AuthorityType::Local => "local",
            AuthorityType::Supranational => "supranational",
        }
    }
}

/// A registered web source. Pure data; the registry is static and additions
/// require redeploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub source_type: SourceType,
    pub authority_type: AuthorityType,
    pub jurisdiction: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    /// 1-5, 5 = official authority.
    pub reliability_tier: u8,
    /// For search-type sources: the stored query.
    pub search_keywords: Option<String>,
    pub description: String,
}

/// One fetched item, before analysis. Fetchers produce these; the analyzer
/// and store consume them.
#[derive(Debug, Clone)]
pub struct CrawledItem {
    pub source: Source,
    pub url: String,
    pub title: String,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

// --- Regulation lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Proposed,
    Introduced,
    CommitteeReview,
    Passed,
    Enacted,
    Effective,
    Amended,
    Withdrawn,
    Rejected,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Proposed,
        Stage::Introduced,
        Stage::CommitteeReview,
        Stage::Passed,
        Stage::Enacted,
        Stage::Effective,
        Stage::Amended,
        Stage::Withdrawn,
        Stage::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Proposed => "proposed",
            Stage::Introduced => "introduced",
            Stage::CommitteeReview => "committee_review",
            Stage::Passed => "passed",
            Stage::Enacted => "enacted",
            Stage::Effective => "effective",
            Stage::Amended => "amended",
            Stage::Withdrawn => "withdrawn",
            Stage::Rejected => "rejected",
        }
    }

    /// Parse a stage string, falling back to `Proposed` for anything the
    /// analyzer invents outside the enum.
    pub fn parse_or_default(s: &str) -> Stage {
        Stage::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim().to_lowercase())
            .unwrap_or(Stage::Proposed)
    }

    pub fn parse_strict(s: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|v| v.as_str() == s)
    }

    /// Display color used by the brief and dashboard.
    pub fn color(&self) -> &'static str {
        match self {
            Stage::Proposed | Stage::Introduced => "#6b7280",
            Stage::CommitteeReview => "#2563eb",
            Stage::Passed => "#d97706",
            Stage::Enacted | Stage::Effective => "#dc2626",
            Stage::Amended => "#7c3aed",
            Stage::Withdrawn | Stage::Rejected => "#9ca3af",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "13-15")]
    Younger,
    #[serde(rename = "16-18")]
    Older,
    #[serde(rename = "both")]
    Both,
}

impl AgeBracket {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBracket::Younger => "13-15",
            AgeBracket::Older => "16-18",
            AgeBracket::Both => "both",
        }
    }

    pub fn parse_or_default(s: &str) -> AgeBracket {
        match s.trim() {
            "13-15" => AgeBracket::Younger,
            "16-18" => AgeBracket::Older,
            _ => AgeBracket::Both,
        }
    }

    pub fn parse_strict(s: &str) -> Option<AgeBracket> {
        match s {
            "13-15" => Some(AgeBracket::Younger),
            "16-18" => Some(AgeBracket::Older),
            "both" => Some(AgeBracket::Both),
            _ => None,
        }
    }
}

// --- Analyzer output ---

/// A validated, clamped regulation finding. Built only at the analyzer
/// boundary; downstream code never sees the raw LLM object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationFinding {
    pub title: String,
    pub jurisdiction_country: String,
    pub jurisdiction_state: Option<String>,
    pub stage: Stage,
    pub is_under16_applicable: bool,
    pub age_bracket: AgeBracket,
    pub impact_score: u8,
    pub likelihood_score: u8,
    pub confidence_score: u8,
    pub chili_score: u8,
    pub summary: String,
    pub business_impact: String,
    pub required_solutions: Vec<String>,
    pub affected_products: Vec<String>,
    pub competitor_responses: Vec<String>,
    /// Kept as strings; date validation is the read boundary's problem.
    pub effective_date: Option<String>,
    pub published_date: Option<String>,
}

/// Tagged analyzer verdict. `Irrelevant` is distinct from a failed call
/// (which yields `None` at the pipeline level).
#[derive(Debug, Clone)]
pub enum Analysis {
    Irrelevant,
    Relevant(RegulationFinding),
}

// --- Store inputs/outputs ---

/// Everything the store needs to upsert one regulation event.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub finding: RegulationFinding,
    pub raw_text: String,
    pub source_url_link: String,
    pub source_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    New,
    Updated,
    Duplicate,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::New => "new",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Duplicate => "duplicate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_round_trips() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse_strict(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn unknown_stage_falls_back_to_proposed() {
        assert_eq!(Stage::parse_or_default("pre-filed"), Stage::Proposed);
        assert_eq!(Stage::parse_or_default(""), Stage::Proposed);
    }

    #[test]
    fn stage_parse_is_case_and_space_tolerant() {
        assert_eq!(Stage::parse_or_default(" Enacted "), Stage::Enacted);
        assert_eq!(Stage::parse_or_default("COMMITTEE_REVIEW"), Stage::CommitteeReview);
    }

    #[test]
    fn age_bracket_falls_back_to_both() {
        assert_eq!(AgeBracket::parse_or_default("under 13"), AgeBracket::Both);
        assert_eq!(AgeBracket::parse_or_default("13-15"), AgeBracket::Younger);
    }

    #[test]
    fn age_bracket_serde_uses_hyphenated_names() {
        let json = serde_json::to_string(&AgeBracket::Younger).unwrap();
        assert_eq!(json, "\"13-15\"");
        let back: AgeBracket = serde_json::from_str("\"16-18\"").unwrap();
        assert_eq!(back, AgeBracket::Older);
    }
}
