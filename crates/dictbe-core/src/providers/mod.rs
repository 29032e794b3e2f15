//! Multi-provider chat abstraction layer
//!
//! Supports OpenAI-style, Anthropic and Google Gemini endpoints.
//! Adapters implement the [`ChatClient`] trait and are selected once, at
//! configuration time, via [`build_client`].

pub mod anthropic;
pub mod error;
pub mod factory;
pub mod google;
pub mod openai;
mod stream;
mod transport;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use error::{BoxError, ChatError, ErrorKind};
pub use factory::{ClientConfig, ParseProviderKindError, ProviderKind, build_client};
pub use google::{GeminiClient, GeminiConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{ChatClient, ChatRequest, ChatResponse, Message, ParseRoleError, Role, StreamHandler};
