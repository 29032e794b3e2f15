//! dictbe-core - chat completion client for the dict-be translator
//!
//! This crate provides:
//! - A provider-agnostic chat data model and the [`ChatClient`] contract
//! - Adapters for OpenAI-style, Anthropic and Gemini endpoints, blocking and streaming
//! - A line-oriented stream decoder shared by all adapters
//! - Adapter selection from a configured provider type

pub mod providers;

// Re-export main types for convenience
pub use providers::{
    AnthropicClient, AnthropicConfig, ChatClient, ChatError, ChatRequest, ChatResponse,
    ClientConfig, ErrorKind, GeminiClient, GeminiConfig, Message, OpenAiClient, OpenAiConfig,
    ProviderKind, Role, StreamHandler, build_client,
};
