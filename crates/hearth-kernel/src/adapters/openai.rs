//! OpenAI-compatible chat completions adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{wire_messages, Model, WireMessage};
use crate::history::Turn;

pub struct OpenAiModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiModel {
    pub fn new(client: Client, base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    async fn post(&self, turns: &[Turn], system: &str) -> Result<(reqwest::StatusCode, String)> {
        let body = ChatRequest {
            model: &self.model,
            messages: wire_messages(turns, system),
        };
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .context("Chat completions request failed")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl Model for OpenAiModel {
    async fn send_request(&self, turns: &[Turn], system: &str) -> Result<String> {
        let mut turns = turns;
        loop {
            tracing::debug!(model = %self.model, turns = turns.len(), "sending chat completion");
            let (status, text) = self.post(turns, system).await?;

            // Drop the oldest turn and retry while the context is too long.
            if status.as_u16() == 400 && text.contains("context_length_exceeded") && turns.len() > 1 {
                tracing::warn!(turns = turns.len(), "context length exceeded; dropping oldest turn");
                turns = &turns[1..];
                continue;
            }
            if !status.is_success() {
                anyhow::bail!("Chat completions returned HTTP {status}: {text}");
            }

            let parsed: ChatResponse = serde_json::from_str(&text)
                .with_context(|| format!("Unexpected chat completions response: {text}"))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .context("Chat completions response had no content");
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}
