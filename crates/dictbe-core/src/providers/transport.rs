//! HTTP plumbing shared by the chat adapters

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::ChatError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport used when the caller does not supply one.
///
/// Only the connect phase is bounded; a total timeout would cut long streams short.
pub(crate) fn default_http_client() -> Result<Client, ChatError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ChatError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// `base` without trailing slashes, followed by `path` under `/v1` unless already there
pub(crate) fn v1_endpoint(base_url: &str, path: &str, what: &str) -> Result<String, ChatError> {
    let base = base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(ChatError::Configuration(format!("{what} is required")));
    }
    if base.ends_with("/v1") {
        Ok(format!("{base}{path}"))
    } else {
        Ok(format!("{base}/v1{path}"))
    }
}

/// Race an I/O future against cancellation. Cancellation wins when both are ready.
pub(crate) async fn cancellable<T, F>(
    provider: &'static str,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("{} request cancelled", provider);
            Err(ChatError::Cancelled { provider })
        }
        result = fut => result,
    }
}

/// Send `request`, returning the response only when its status is 2xx
pub(crate) async fn send(
    provider: &'static str,
    cancel: &CancellationToken,
    request: RequestBuilder,
) -> Result<Response, ChatError> {
    let response = cancellable(provider, cancel, async {
        request
            .send()
            .await
            .map_err(|e| ChatError::transport("send request", e))
    })
    .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = cancellable(provider, cancel, async {
        response
            .text()
            .await
            .map_err(|e| ChatError::transport("read error body", e))
    })
    .await?;
    warn!("{} request failed with status {}", provider, status);
    Err(status_error(provider, status.as_u16(), &body))
}

/// Read the whole body and decode it as `T`
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    cancel: &CancellationToken,
    response: Response,
) -> Result<T, ChatError> {
    let body = cancellable(provider, cancel, async {
        response
            .bytes()
            .await
            .map_err(|e| ChatError::transport("read response body", e))
    })
    .await?;
    serde_json::from_slice(&body).map_err(|e| ChatError::decode("decode response", e))
}

fn status_error(provider: &'static str, status: u16, body: &str) -> ChatError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|error| error.message().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| "request failed".to_string());
    ChatError::Provider {
        provider,
        message,
        status: Some(status),
    }
}

/// The `error` member all three providers use: an object with a `message`, or a bare string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireError {
    Object {
        #[serde(default)]
        message: String,
    },
    Text(String),
}

impl WireError {
    pub(crate) fn message(&self) -> &str {
        match self {
            Self::Object { message } => message,
            Self::Text(message) => message,
        }
    }
}

/// Read an explicit `null` the same as a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<WireError>,
}
