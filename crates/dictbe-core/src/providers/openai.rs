//! OpenAI-style chat completions adapter (OpenAI and compatible gateways)

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

const PROVIDER: &str = "openai";

/// Construction parameters for [`OpenAiClient`]
#[derive(Clone, Default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Transport to reuse; a default client is built when absent
    pub http_client: Option<Client>,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// OpenAI provider
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ChatError> {
        let base_url = require(&config.base_url, "openai base url")?;
        let api_key = require(&config.api_key, "openai token")?;
        let model = require(&config.model, "openai model")?;
        let client = match config.http_client {
            Some(client) => client,
            None => transport::default_http_client()?,
        };

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> OpenAiRequest<'a> {
        OpenAiRequest {
            model: request.resolve_model(&self.model),
            messages: &request.messages,
            stream,
        }
    }

    async fn send(
        &self,
        body: &OpenAiRequest<'_>,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ChatError> {
        let url = chat_endpoint(&self.base_url)?;
        debug!(
            "OpenAI request: url={}, model={}, messages={}, stream={}",
            url,
            body.model,
            body.messages.len(),
            stream
        );

        let mut http = self.client.post(&url).bearer_auth(&self.api_key);
        if stream {
            http = http.header(ACCEPT, "text/event-stream");
        }
        transport::send(PROVIDER, cancel, http.json(body)).await
    }

    /// Convert OpenAI response to provider-agnostic format
    fn from_openai_response(resp: OpenAiResponse) -> Result<ChatResponse, ChatError> {
        if let Some(error) = resp.error {
            return Err(ChatError::provider(PROVIDER, error.message()));
        }
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::protocol(PROVIDER, "response has no choices"))?;

        Ok(ChatResponse {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            model: resp.model.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}

/// `…/v1/chat/completions`, without doubling an existing `/v1`
pub(crate) fn chat_endpoint(base_url: &str) -> Result<String, ChatError> {
    transport::v1_endpoint(base_url, "/chat/completions", "openai base url")
}

/// Stream chunks share the response schema, with `delta` in place of `message`
fn decode_chunk(payload: &[u8]) -> Result<ChunkUpdate, ChatError> {
    let chunk: OpenAiResponse = stream::parse_chunk(payload)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::provider(PROVIDER, error.message()));
    }

    let mut update = ChunkUpdate {
        model: chunk.model,
        ..ChunkUpdate::default()
    };
    if let Some(choice) = chunk.choices.into_iter().next() {
        update.finish_reason = choice.finish_reason;
        update.delta = choice.delta.and_then(|d| d.content).unwrap_or_default();
    }
    Ok(update)
}

#[async_trait]
impl ChatClient for OpenAiClient {
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
        let api_response: OpenAiResponse = transport::read_json(PROVIDER, cancel, response).await?;

        debug!(
            "OpenAI response: choices={}, model={:?}",
            api_response.choices.len(),
            api_response.model
        );

        Self::from_openai_response(api_response)
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
            decode_chunk,
            handler,
            cancel,
        )
        .await
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "transport::null_as_default")]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiMessage>,
    #[serde(default)]
    delta: Option<OpenAiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new(OpenAiConfig {
            base_url: "https://api.openai.com".to_string(),
            api_key: "sk-secret".to_string(),
            model: "gpt-default".to_string(),
            http_client: None,
        })
        .unwrap()
    }

    #[test]
    fn test_chat_endpoint_table() {
        let cases = [
            ("https://api.openai.com", "https://api.openai.com/v1/chat/completions"),
            ("https://api.openai.com/", "https://api.openai.com/v1/chat/completions"),
            ("https://api.openai.com/v1", "https://api.openai.com/v1/chat/completions"),
            ("https://api.openai.com/v1/", "https://api.openai.com/v1/chat/completions"),
            ("http://localhost:8080/openai", "http://localhost:8080/openai/v1/chat/completions"),
            ("https://gw.example.com/v1beta", "https://gw.example.com/v1beta/v1/chat/completions"),
        ];
        for (base, expected) in cases {
            assert_eq!(chat_endpoint(base).unwrap(), expected, "base {base}");
        }
    }

    #[test]
    fn test_new_rejects_blank_fields() {
        let ok = OpenAiConfig {
            base_url: "https://api.openai.com".to_string(),
            api_key: "key".to_string(),
            model: "gpt".to_string(),
            http_client: None,
        };
        for (field, config) in [
            ("base url", OpenAiConfig { base_url: " ".to_string(), ..ok.clone() }),
            ("token", OpenAiConfig { api_key: "".to_string(), ..ok.clone() }),
            ("model", OpenAiConfig { model: "\t".to_string(), ..ok.clone() }),
        ] {
            let err = OpenAiClient::new(config).unwrap_err();
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn test_request_passes_messages_through() {
        let client = client();
        let req = ChatRequest::new(vec![Message::system("sys"), Message::user("hi")]).with_model("gpt-test");
        let body = serde_json::to_value(client.build_request(&req, false)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"},
                ],
            })
        );
    }

    #[test]
    fn test_stream_request_sets_flag() {
        let client = client();
        let req = ChatRequest::new(vec![Message::user("hi")]);
        let body = serde_json::to_value(client.build_request(&req, true)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "gpt-default");
    }

    #[test]
    fn test_from_openai_response_text() {
        let resp: OpenAiResponse = serde_json::from_str(
            r#"{"id":"c1","model":"gpt-test","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        let result = OpenAiClient::from_openai_response(resp).unwrap();
        assert_eq!(
            result,
            ChatResponse {
                content: "hello".to_string(),
                model: "gpt-test".to_string(),
                finish_reason: "stop".to_string(),
            }
        );
    }

    #[test]
    fn test_from_openai_response_no_choices() {
        let resp: OpenAiResponse = serde_json::from_str(r#"{"model":"gpt-test","choices":[]}"#).unwrap();
        let err = OpenAiClient::from_openai_response(resp).unwrap_err();
        assert_eq!(err.kind(), crate::providers::ErrorKind::Protocol);
    }

    #[test]
    fn test_from_openai_response_error_object() {
        let resp: OpenAiResponse =
            serde_json::from_str(r#"{"error":{"message":"rate limited","type":"requests"}}"#).unwrap();
        let err = OpenAiClient::from_openai_response(resp).unwrap_err();
        assert_eq!(err.to_string(), "openai error: rate limited");
    }

    #[test]
    fn test_decode_chunk_delta() {
        let update = decode_chunk(
            br#"{"model":"gpt-test","choices":[{"index":0,"delta":{"content":"he"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(update.model.as_deref(), Some("gpt-test"));
        assert_eq!(update.delta, "he");
        assert!(update.finish_reason.is_none());
    }

    #[test]
    fn test_decode_chunk_without_choices() {
        let update = decode_chunk(br#"{"model":"gpt-test","choices":[]}"#).unwrap();
        assert!(update.delta.is_empty());
    }

    #[test]
    fn test_decode_chunk_null_choices() {
        let update = decode_chunk(
            br#"{"model":"gpt-test","choices":null,"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(update.model.as_deref(), Some("gpt-test"));
        assert!(update.delta.is_empty());
        assert!(update.finish_reason.is_none());
    }

    #[test]
    fn test_from_openai_response_null_choices() {
        let resp: OpenAiResponse =
            serde_json::from_str(r#"{"model":"gpt-test","choices":null}"#).unwrap();
        let err = OpenAiClient::from_openai_response(resp).unwrap_err();
        assert_eq!(err.kind(), crate::providers::ErrorKind::Protocol);
    }

    #[test]
    fn test_decode_chunk_error() {
        let err = decode_chunk(br#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert_eq!(err.to_string(), "openai error: overloaded");
    }

    #[test]
    fn test_openai_client_debug_hides_key() {
        let debug = format!("{:?}", client());
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("gpt-default"));
    }
}
