//! Google Gemini generateContent adapter

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::error::ChatError;
use super::stream::{self, ChunkUpdate, Framing};
use super::transport::{self, WireError};
use super::types::{ChatClient, ChatRequest, ChatResponse, Message, Role, StreamHandler, require};

const PROVIDER: &str = "gemini";

/// Construction parameters for [`GeminiClient`]
#[derive(Clone, Default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub http_client: Option<Client>,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Google Gemini provider
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ChatError> {
        let base_url = require(&config.base_url, "gemini base url")?;
        let api_key = require(&config.api_key, "gemini token")?;
        let model = require(&config.model, "gemini model")?;
        generate_endpoint(&base_url, &model, false, &api_key)?;
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

    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ChatError> {
        let model = request.resolve_model(&self.model);
        let url = generate_endpoint(&self.base_url, model, stream, &self.api_key)?;
        let body = to_gemini_request(request);
        // The query string carries the key; only the path is logged
        debug!(
            "Gemini request: path={}, contents={}, system={}, stream={}",
            url.path(),
            body.contents.len(),
            body.system_instruction.is_some(),
            stream
        );

        let mut http = self.client.post(url);
        if stream {
            http = http.header(ACCEPT, "text/event-stream");
        }
        transport::send(PROVIDER, cancel, http.json(&body)).await
    }

    /// Convert Gemini response to provider-agnostic format
    fn from_gemini_response(resp: GeminiResponse) -> Result<ChatResponse, ChatError> {
        if let Some(error) = resp.error {
            return Err(ChatError::provider(PROVIDER, error.message()));
        }
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::protocol(PROVIDER, "response has no candidates"))?;

        Ok(ChatResponse {
            content: candidate.text(),
            model: resp.model_version.unwrap_or_default(),
            finish_reason: candidate.finish_reason.unwrap_or_default(),
        })
    }
}

/// Build `<base>/v1beta/models/<model>:<verb>?key=<key>`.
///
/// The base path keeps an existing `/v1` or `/v1beta` suffix. Streaming calls
/// also ask for SSE framing with `alt=sse`. Other query parameters on the base
/// URL are preserved.
pub(crate) fn generate_endpoint(
    base_url: &str,
    model: &str,
    stream: bool,
    api_key: &str,
) -> Result<Url, ChatError> {
    let base_url = require(base_url, "gemini base url")?;
    let model = require(model, "gemini model")?;
    let api_key = require(api_key, "gemini token")?;

    let mut url = Url::parse(&base_url)
        .map_err(|e| ChatError::Configuration(format!("invalid gemini base url: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ChatError::Configuration(format!(
            "invalid gemini base url: {base_url}"
        )));
    }

    let base_path = url.path().trim_end_matches('/');
    let api_path = if base_path.ends_with("/v1") || base_path.ends_with("/v1beta") {
        base_path.to_string()
    } else {
        format!("{base_path}/v1beta")
    };
    let verb = if stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    url.set_path(&format!("{api_path}/models/{model}:{verb}"));

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "key" && k != "alt")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear().extend_pairs(kept);
        if stream {
            query.append_pair("alt", "sse");
        }
        query.append_pair("key", &api_key);
    }
    Ok(url)
}

/// Leading system message becomes `systemInstruction`; `assistant` is spoken as `model`
fn to_gemini_request(request: &ChatRequest) -> GeminiRequest<'_> {
    let (system, messages) = request.split_system();
    GeminiRequest {
        contents: messages.iter().map(GeminiContent::from_message).collect(),
        system_instruction: system.map(|text| GeminiInstruction {
            parts: vec![GeminiTextPart { text }],
        }),
    }
}

fn decode_chunk(payload: &[u8]) -> Result<ChunkUpdate, ChatError> {
    let chunk: GeminiResponse = stream::parse_chunk(payload)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::provider(PROVIDER, error.message()));
    }

    let mut update = ChunkUpdate {
        model: chunk.model_version,
        ..ChunkUpdate::default()
    };
    if let Some(candidate) = chunk.candidates.into_iter().next() {
        update.delta = candidate.text();
        update.finish_reason = candidate.finish_reason;
    }
    Ok(update)
}

#[async_trait]
impl ChatClient for GeminiClient {
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
        let response = self.send(request, false, cancel).await?;
        let api_response: GeminiResponse = transport::read_json(PROVIDER, cancel, response).await?;

        debug!(
            "Gemini response: candidates={}, model_version={:?}",
            api_response.candidates.len(),
            api_response.model_version
        );

        Self::from_gemini_response(api_response)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        handler: &mut StreamHandler<'_>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let response = self.send(request, true, cancel).await?;
        stream::consume(
            PROVIDER,
            Framing::JsonObjects,
            Box::pin(response.bytes_stream()),
            decode_chunk,
            handler,
            cancel,
        )
        .await
    }
}

// ── Gemini wire types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiInstruction<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiTextPart<'a>>,
}

impl<'a> GeminiContent<'a> {
    fn from_message(message: &'a Message) -> Self {
        let role = match message.role {
            Role::Assistant => "model",
            // Only a leading system message has a dedicated slot
            Role::User | Role::System => "user",
        };
        Self {
            role,
            parts: vec![GeminiTextPart {
                text: &message.content,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiInstruction<'a> {
    parts: Vec<GeminiTextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiTextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default, deserialize_with = "transport::null_as_default")]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default, deserialize_with = "transport::null_as_default")]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiCandidate {
    /// Concatenation of every text part
    fn text(&self) -> String {
        self.content
            .iter()
            .flat_map(|c| &c.parts)
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}
