//! Ollama chat adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{wire_messages, Model, WireMessage};
use crate::history::Turn;

pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaModel {
    pub fn new(client: Client, base_url: String, model: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl Model for OllamaModel {
    async fn send_request(&self, turns: &[Turn], system: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: wire_messages(turns, system),
            stream: false,
        };
        tracing::debug!(model = %self.model, turns = turns.len(), "sending ollama chat");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Ollama request failed")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Ollama returned HTTP {status}: {text}");
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .with_context(|| format!("Unexpected Ollama response: {text}"))?;
        Ok(parsed.message.content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
