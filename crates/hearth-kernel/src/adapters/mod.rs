//! Adapters - language model integrations.

mod ollama;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::ModelConfig;
use crate::history::Turn;

pub use ollama::OllamaModel;
pub use openai::OpenAiModel;

/// A chat model: conversation turns and a system prompt in, text out.
///
/// Retries, if any, are the adapter's business.
#[async_trait]
pub trait Model: Send + Sync {
    async fn send_request(&self, turns: &[Turn], system: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Available model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    /// Parse provider from name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "openai" | "gpt" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Get provider name
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    fn default_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://127.0.0.1:11434",
        }
    }
}

/// Build the model described by `config`.
pub fn build(config: &ModelConfig) -> Result<Arc<dyn Model>> {
    let provider = Provider::from_name(&config.provider)
        .with_context(|| format!("Unknown model provider '{}'", config.provider))?;
    let url = config
        .url
        .clone()
        .unwrap_or_else(|| provider.default_url().to_string());
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    tracing::info!(provider = provider.name(), model = %config.model, url = %url, "model configured");
    Ok(match provider {
        Provider::OpenAi => {
            let api_key = std::env::var(&config.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(env = %config.api_key_env, "no API key found; requests may be rejected");
            }
            Arc::new(OpenAiModel::new(client, url, config.model.clone(), api_key))
        }
        Provider::Ollama => Arc::new(OllamaModel::new(client, url, config.model.clone())),
    })
}

/// Chat message in the shape both providers accept.
#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn wire_messages<'a>(turns: &'a [Turn], system: &'a str) -> Vec<WireMessage<'a>> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system.is_empty() {
        messages.push(WireMessage {
            role: "system",
            content: system,
        });
    }
    messages.extend(turns.iter().map(|t| WireMessage {
        role: t.role.as_str(),
        content: &t.content,
    }));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_by_name() {
        assert_eq!(Provider::from_name("OpenAI"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_name("ollama"), Some(Provider::Ollama));
        assert_eq!(Provider::from_name("carrier-pigeon"), None);
    }

    #[test]
    fn system_prompt_leads_the_messages() {
        let turns = [Turn::user("mine some logs")];
        let messages = wire_messages(&turns, "be brief");
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "mine some logs"},
            ])
        );
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = ModelConfig {
            provider: "nope".into(),
            ..ModelConfig::default()
        };
        let err = build(&config).map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("Unknown model provider"));
    }
}
