//! Thin client for a messages-shaped LLM endpoint (Anthropic wire format).
//! The analyzer is the only consumer; it sends one user message per crawled
//! item and reads back the first text block.

pub mod minimax;

pub use minimax::{Minimax, MinimaxClient};
pub use minimax::types::{ChatRequest, ChatResponse, WireMessage};
