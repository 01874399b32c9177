//! Static source registry. Pure data; additions require redeploy.

use regpulse_common::{AuthorityType, Source, SourceType};

fn source(
    name: &str,
    url: &str,
    source_type: SourceType,
    authority_type: AuthorityType,
    jurisdiction: &str,
    jurisdiction_country: &str,
    jurisdiction_state: Option<&str>,
    reliability_tier: u8,
    search_keywords: Option<&str>,
    description: &str,
) -> Source {
    Source {
        name: name.to_string(),
        url: url.to_string(),
        source_type,
        authority_type,
        jurisdiction: jurisdiction.to_string(),
        jurisdiction_country: jurisdiction_country.to_string(),
        jurisdiction_state: jurisdiction_state.map(str::to_string),
        reliability_tier,
        search_keywords: search_keywords.map(str::to_string),
        description: description.to_string(),
    }
}

/// All registered sources, official authorities first.
pub fn registry() -> Vec<Source> {
    use AuthorityType::*;
    use SourceType::*;

    vec![
        // --- US federal ---
        source(
            "FTC Children's Privacy",
            "https://www.ftc.gov/business-guidance/privacy-security/childrens-privacy",
            GovernmentPage, National, "United States", "US", None, 5, None,
            "FTC guidance and enforcement on COPPA",
        ),
        source(
            "FTC Press Releases",
            "https://www.ftc.gov/feeds/press-release.xml",
            RssFeed, National, "United States", "US", None, 5, None,
            "FTC press release feed, includes COPPA rulemaking and consent orders",
        ),
        source(
            "Congress.gov Kids Online Safety",
            "https://www.congress.gov/search?q=%7B%22search%22%3A%22kids+online+safety%22%7D",
            LegalDatabase, National, "United States", "US", None, 5,
            Some("kids online safety act KOSA"),
            "Federal bill tracking for KOSA and related measures",
        ),
        // --- US states ---
        source(
            "California Legislature AADC",
            "https://leginfo.legislature.ca.gov/faces/billTextClient.xhtml?bill_id=202120220AB2273",
            LegalDatabase, State, "California, United States", "US", Some("California"), 5,
            Some("age-appropriate design code AB 2273"),
            "California Age-Appropriate Design Code Act bill text and status",
        ),
        source(
            "Texas Legislature SCOPE",
            "https://capitol.texas.gov/BillLookup/History.aspx?LegSess=88R&Bill=HB18",
            LegalDatabase, State, "Texas, United States", "US", Some("Texas"), 5,
            Some("SCOPE Act HB 18 parental consent"),
            "Texas SCOPE Act bill history",
        ),
        source(
            "Utah Governor Newsroom",
            "https://governor.utah.gov/press-releases/",
            GovernmentPage, State, "Utah, United States", "US", Some("Utah"), 4,
            Some("social media minors age verification"),
            "Utah social-media minor protection announcements",
        ),
        // --- UK ---
        source(
            "Ofcom Online Safety",
            "https://www.ofcom.org.uk/online-safety",
            GovernmentPage, National, "United Kingdom", "United Kingdom", None, 5, None,
            "Ofcom Online Safety Act implementation hub",
        ),
        source(
            "UK ICO Children's Code",
            "https://ico.org.uk/for-organisations/childrens-code-hub/",
            GovernmentPage, National, "United Kingdom", "United Kingdom", None, 5, None,
            "ICO Age Appropriate Design Code hub",
        ),
        // --- EU ---
        source(
            "European Commission DSA",
            "https://digital-strategy.ec.europa.eu/en/policies/digital-services-act-package",
            GovernmentPage, Supranational, "European Union", "European Union", None, 5, None,
            "Commission DSA policy page, including Article 28 minors guidance",
        ),
        source(
            "EDPB News",
            "https://www.edpb.europa.eu/feed/news_en",
            RssFeed, Supranational, "European Union", "European Union", None, 5, None,
            "European Data Protection Board news feed",
        ),
        // --- Australia ---
        source(
            "eSafety Commissioner",
            "https://www.esafety.gov.au/newsroom",
            GovernmentPage, National, "Australia", "Australia", None, 5, None,
            "Australian eSafety Commissioner newsroom",
        ),
        // --- India / Singapore ---
        source(
            "MeitY Press",
            "https://www.meity.gov.in/whatsnew",
            GovernmentPage, National, "India", "India", None, 5,
            Some("DPDP digital personal data protection children"),
            "Indian Ministry of Electronics and IT announcements",
        ),
        source(
            "Singapore PDPC",
            "https://www.pdpc.gov.sg/news-and-events",
            GovernmentPage, National, "Singapore", "Singapore", None, 5, None,
            "Singapore Personal Data Protection Commission news",
        ),
        // --- Trade and tech-policy press ---
        source(
            "IAPP Daily Dashboard",
            "https://iapp.org/feed/",
            RssFeed, National, "United States", "US", None, 4, None,
            "Privacy trade press, strong coverage of child-privacy rulemaking",
        ),
        source(
            "TechCrunch Policy",
            "https://techcrunch.com/category/government-policy/feed/",
            RssFeed, National, "United States", "US", None, 3, None,
            "Tech policy reporting",
        ),
        source(
            "The Verge Policy",
            "https://www.theverge.com/rss/policy/index.xml",
            RssFeed, National, "United States", "US", None, 3, None,
            "Tech policy reporting",
        ),
        source(
            "Google News Child Safety Laws",
            "https://news.google.com/rss/search?q=%22online%20safety%22%20children%20law",
            NewsSearch, National, "United States", "US", None, 2,
            Some("online safety children law"),
            "News search for child online-safety legislation",
        ),
        // --- Microblog queries ---
        source(
            "X KOSA Watch",
            "https://api.x.com/2/tweets/search/recent",
            MicroblogSearch, National, "United States", "US", None, 2,
            Some("(KOSA OR \"Kids Online Safety Act\") -is:retweet lang:en"),
            "Recent-search query tracking KOSA chatter",
        ),
        source(
            "X Age Verification Watch",
            "https://api.x.com/2/tweets/search/recent",
            MicroblogSearch, National, "United States", "US", None, 2,
            Some("\"age verification\" (law OR bill OR act) -is:retweet lang:en"),
            "Recent-search query tracking age-verification legislation",
        ),
    ]
}

/// Sources for one jurisdiction country (case-insensitive).
pub fn by_jurisdiction(sources: &[Source], country: &str) -> Vec<Source> {
    sources
        .iter()
        .filter(|s| s.jurisdiction_country.eq_ignore_ascii_case(country))
        .cloned()
        .collect()
}

/// Sources at or above a reliability tier.
pub fn with_min_tier(sources: &[Source], min_tier: u8) -> Vec<Source> {
    sources
        .iter()
        .filter(|s| s.reliability_tier >= min_tier)
        .cloned()
        .collect()
}
