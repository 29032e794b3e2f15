//! Error taxonomy shared by every chat adapter

use thiserror::Error;

/// Boxed source for transport failures (reqwest errors, oversized stream lines)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fieldless classification of a [`ChatError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Decode,
    Provider,
    Protocol,
    Handler,
    Cancelled,
}

/// Every failure a [`ChatClient`](super::ChatClient) call can produce
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or unusable base URL, credential or model
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure while sending the request or reading the body
    #[error("{operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// Malformed JSON in a response body or stream chunk
    #[error("{operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The provider reported an error; `message` is kept verbatim
    #[error("{provider} error: {message}{}", status_suffix(.status))]
    Provider {
        provider: &'static str,
        message: String,
        status: Option<u16>,
    },

    /// Well-formed response that cannot be turned into a chat response
    #[error("{provider} protocol error: {message}")]
    Protocol {
        provider: &'static str,
        message: String,
    },

    /// The caller's stream handler failed
    #[error(transparent)]
    Handler(anyhow::Error),

    #[error("{provider} request cancelled")]
    Cancelled { provider: &'static str },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ChatError {
    pub(crate) fn transport(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            operation,
            source: source.into(),
        }
    }

    pub(crate) fn decode(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { operation, source }
    }

    pub(crate) fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            status: None,
        }
    }

    pub(crate) fn protocol(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Handler(_) => ErrorKind::Handler,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
