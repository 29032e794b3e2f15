//! Anthropic Claude messages adapter

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ChatError;
use super::stream::{self, ChunkUpdate, Framing};
use super::transport::{self, WireError};
use super::types::{ChatClient, ChatRequest, ChatResponse, Message, StreamHandler, require};

const PROVIDER: &str = "anthropic";

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Construction parameters for [`AnthropicClient`]
#[derive(Clone, Default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// `anthropic-version` header; blank means [`DEFAULT_ANTHROPIC_VERSION`]
    pub version: String,
    /// Output token cap; `None` or zero means [`DEFAULT_MAX_TOKENS`]
    pub max_tokens: Option<u32>,
    pub http_client: Option<Client>,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("version", &self.version)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Anthropic Claude provider
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    version: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, ChatError> {
        let base_url = require(&config.base_url, "anthropic base url")?;
        let api_key = require(&config.api_key, "anthropic token")?;
        let model = require(&config.model, "anthropic model")?;
        let version = match config.version.trim() {
            "" => DEFAULT_ANTHROPIC_VERSION.to_string(),
            v => v.to_string(),
        };
        let max_tokens = config
            .max_tokens
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let client = match config.http_client {
            Some(client) => client,
            None => transport::default_http_client()?,
        };

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            version,
            max_tokens,
        })
    }

    /// Leading system message moves to the top-level `system` field
    fn build_request<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> AnthropicRequest<'a> {
        let (system, messages) = request.split_system();
        AnthropicRequest {
            model: request.resolve_model(&self.model),
            messages,
            system: system.filter(|s| !s.is_empty()),
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn send(
        &self,
        body: &AnthropicRequest<'_>,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ChatError> {
        let url = messages_endpoint(&self.base_url)?;
        debug!(
            "Anthropic request: url={}, model={}, messages={}, system={}, stream={}",
            url,
            body.model,
            body.messages.len(),
            body.system.is_some(),
            stream
        );

        let mut http = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version);
        if stream {
            http = http.header(ACCEPT, "text/event-stream");
        }
        transport::send(PROVIDER, cancel, http.json(body)).await
    }

    /// Convert Anthropic response to provider-agnostic format
    fn from_anthropic_response(resp: AnthropicResponse) -> Result<ChatResponse, ChatError> {
        if let Some(error) = resp.error {
            return Err(ChatError::provider(PROVIDER, error.message()));
        }
        let blocks = resp
            .content
            .ok_or_else(|| ChatError::protocol(PROVIDER, "response has no content"))?;

        let content = blocks
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<String>();

        Ok(ChatResponse {
            content,
            model: resp.model.unwrap_or_default(),
            finish_reason: resp.stop_reason.unwrap_or_default(),
        })
    }
}

/// `…/v1/messages`, without doubling an existing `/v1`
pub(crate) fn messages_endpoint(base_url: &str) -> Result<String, ChatError> {
    transport::v1_endpoint(base_url, "/messages", "anthropic base url")
}

/// Only three event types matter: `message_start` names the model,
/// `message_delta` carries the stop reason and `content_block_delta` carries text.
fn decode_event(payload: &[u8]) -> Result<ChunkUpdate, ChatError> {
    let event: AnthropicStreamEvent = stream::parse_chunk(payload)?;
    if let Some(error) = event.error {
        return Err(ChatError::provider(PROVIDER, error.message()));
    }

    let mut update = ChunkUpdate::default();
    match event.kind.as_str() {
        "message_start" => {
            update.model = event.message.and_then(|m| m.model);
        }
        "message_delta" => {
            update.finish_reason = event
                .delta
                .and_then(|d| d.stop_reason)
                .or(event.stop_reason);
        }
        "content_block_delta" => {
            update.delta = event.delta.and_then(|d| d.text).unwrap_or_default();
        }
        _ => {}
    }
    Ok(update)
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let body = self.build_request(request, false);
        let response = self.send(&body, false, cancel).await?;
        let api_response: AnthropicResponse =
            transport::read_json(PROVIDER, cancel, response).await?;

        debug!(
            "Anthropic response: stop_reason={:?}, model={:?}",
            api_response.stop_reason, api_response.model
        );

        Self::from_anthropic_response(api_response)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        handler: &mut StreamHandler<'_>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let body = self.build_request(request, true);
        let response = self.send(&body, true, cancel).await?;
        stream::consume(
            PROVIDER,
            Framing::ServerSentEvents,
            Box::pin(response.bytes_stream()),
            decode_event,
            handler,
            cancel,
        )
        .await
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Option<Vec<AnthropicBlock>>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<AnthropicEventMessage>,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct AnthropicEventMessage {
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}
