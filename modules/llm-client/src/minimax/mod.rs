mod client;
pub mod types;

use anyhow::{anyhow, Result};

pub use client::MinimaxClient;
use types::{ChatRequest, WireMessage};

/// High-level handle: one completion per call, plain text in and out.
pub struct Minimax {
    client: MinimaxClient,
    model: String,
}

impl Minimax {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: MinimaxClient::new(api_key),
            model: model.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }

    /// Send one user message and return the first text block of the reply.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .max_tokens(max_tokens)
            .message(WireMessage::user(prompt));

        let response = self.client.chat(&request).await?;

        response
            .text()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("LLM response contained no text block"))
    }
}
