//! Provider-agnostic types for chat completion

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::error::ChatError;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Provider-agnostic chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A single chat call: an optional per-call model override and the conversation so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

/// Provider-agnostic response from an LLM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: String,
}

/// Callback receiving each non-empty streamed delta, in arrival order.
/// Returning an error aborts the stream and becomes the call's result.
pub type StreamHandler<'a> = dyn FnMut(&str) -> anyhow::Result<()> + Send + 'a;

/// Trait that all chat adapters implement
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic", "openai")
    fn provider_name(&self) -> &str;

    /// Default model used when a request carries no override
    fn model(&self) -> &str;

    /// One blocking request/response cycle
    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError>;

    /// Open a streaming call, feeding every non-empty delta to `handler`
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        handler: &mut StreamHandler<'_>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError>;
}

#[derive(Debug, Error)]
#[error("unknown message role: {0}")]
pub struct ParseRoleError(String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
        }
    }

    /// Override the adapter's default model for this call only
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Split off a leading system message.
    ///
    /// Only the first message is considered; a system message elsewhere stays in place.
    pub(crate) fn split_system(&self) -> (Option<&str>, &[Message]) {
        match self.messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(&first.content), rest),
            _ => (None, &self.messages),
        }
    }

    /// The per-call override when it is non-blank, else `default`
    pub(crate) fn resolve_model<'a>(&'a self, default: &'a str) -> &'a str {
        match self.model.as_deref().map(str::trim) {
            Some(model) if !model.is_empty() => model,
            _ => default,
        }
    }
}

/// Trim a required construction field, failing when it ends up empty
pub(crate) fn require(value: &str, what: &str) -> Result<String, ChatError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ChatError::Configuration(format!("{what} is required")));
    }
    Ok(value.to_string())
}
