use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegPulseError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Crawl conflict: another crawl run is in progress")]
    CrawlConflict,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
