use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Analyzer API key. Empty means the crawl trigger refuses to start.
    pub minimax_api_key: String,
    /// Override for the analyzer endpoint base URL.
    pub minimax_api_url: Option<String>,
    /// Model name sent on every analyzer request.
    pub analysis_model: String,

    /// Microblog bearer token. Absent means microblog sources are skipped.
    pub x_bearer_token: Option<String>,

    /// Durable store location. `:memory:` permitted for tests.
    pub database_path: String,

    /// Bounded analyzer fan-out. Default 12, clamped to at least 10.
    pub analysis_concurrency: usize,

    // Microblog fetcher tuning
    pub x_api_timeout_ms: u64,
    pub x_api_max_retries: u32,
    pub x_api_base_backoff_ms: u64,
    pub x_api_max_backoff_ms: u64,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables. Nothing here panics:
    /// the analyzer key is validated where a crawl actually starts, so the
    /// read-only API can come up without it.
    pub fn from_env() -> Self {
        Self {
            minimax_api_key: env::var("MINIMAX_API_KEY").unwrap_or_default(),
            minimax_api_url: env::var("MINIMAX_API_URL").ok(),
            analysis_model: env::var("ANALYSIS_MODEL")
                .unwrap_or_else(|_| "MiniMax-M2".to_string()),
            x_bearer_token: env::var("X_BEARER_TOKEN").ok().filter(|v| !v.is_empty()),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/regpulse.db".to_string()),
            analysis_concurrency: env::var("ANALYSIS_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12)
                .max(10),
            x_api_timeout_ms: parse_env("X_API_TIMEOUT_MS", 15_000),
            x_api_max_retries: parse_env("X_API_MAX_RETRIES", 4),
            x_api_base_backoff_ms: parse_env("X_API_BASE_BACKOFF_MS", 1_500),
            x_api_max_backoff_ms: parse_env("X_API_MAX_BACKOFF_MS", 30_000),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        }
    }

    /// Log key presence without leaking values.
    pub fn log_redacted(&self) {
        if self.minimax_api_key.is_empty() {
            tracing::info!("MINIMAX_API_KEY = (empty)");
        } else {
            tracing::info!("MINIMAX_API_KEY = ({} chars)", self.minimax_api_key.len());
        }
        match &self.x_bearer_token {
            Some(token) => tracing::info!("X_BEARER_TOKEN = ({} chars)", token.len()),
            None => tracing::info!("X_BEARER_TOKEN = (unset, microblog sources skipped)"),
        }
        tracing::info!(
            database_path = %self.database_path,
            analysis_concurrency = self.analysis_concurrency,
            "Config loaded"
        );
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
