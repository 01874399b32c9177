//! Crawl side of the pipeline: the source registry, per-source-type
//! fetchers, the LLM analyzer and the crawl-run coordinator.

pub mod analyzer;
pub mod feed;
pub mod microblog;
pub mod page;
pub mod pipeline;
pub mod registry;

pub use analyzer::{parse_analysis, ItemAnalyzer, LlmAnalyzer};
pub use pipeline::{Pipeline, PipelineOptions, PipelineResult, SourceFetcher, WebFetcher};
