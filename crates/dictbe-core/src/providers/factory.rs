//! Adapter selection from a configured provider type

use reqwest::Client;
use thiserror::Error;

use super::anthropic::{AnthropicClient, AnthropicConfig};
use super::error::ChatError;
use super::google::{GeminiClient, GeminiConfig};
use super::openai::{OpenAiClient, OpenAiConfig};
use super::types::ChatClient;

/// The three supported protocol families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

#[derive(Debug, Error)]
#[error("invalid llm.type: {0}")]
pub struct ParseProviderKindError(String);

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Public endpoint used when no base URL is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ParseProviderKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "openai" => Ok(Self::OpenAi),
            "anthropic" | "anthropics" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(ParseProviderKindError(s.to_string())),
        }
    }
}

/// Everything needed to build any adapter
#[derive(Clone, Default)]
pub struct ClientConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Anthropic only
    pub anthropic_version: String,
    /// Anthropic only
    pub max_tokens: Option<u32>,
    pub http_client: Option<Client>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Construct the adapter for `config.kind`
pub fn build_client(config: ClientConfig) -> Result<Box<dyn ChatClient>, ChatError> {
    let client: Box<dyn ChatClient> = match config.kind {
        ProviderKind::OpenAi => Box::new(OpenAiClient::new(OpenAiConfig {
            base_url: config.base_url,
            api_key: config.api_key,
            model: config.model,
            http_client: config.http_client,
        })?),
        ProviderKind::Anthropic => Box::new(AnthropicClient::new(AnthropicConfig {
            base_url: config.base_url,
            api_key: config.api_key,
            model: config.model,
            version: config.anthropic_version,
            max_tokens: config.max_tokens,
            http_client: config.http_client,
        })?),
        ProviderKind::Gemini => Box::new(GeminiClient::new(GeminiConfig {
            base_url: config.base_url,
            api_key: config.api_key,
            model: config.model,
            http_client: config.http_client,
        })?),
    };
    Ok(client)
}
