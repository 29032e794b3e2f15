//! Line-oriented decoding of streamed chat responses
//!
//! The response body is split into lines, each line is framed according to the
//! provider's encoding, and every payload is handed to a provider-specific chunk
//! decoder. The decoded [`ChunkUpdate`]s are folded into a [`ChatResponse`] while
//! non-empty deltas are forwarded to the caller's handler in arrival order.

use std::io;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{BoxError, ChatError};
use super::transport::cancellable;
use super::types::{ChatResponse, StreamHandler};

/// Initial capacity of the read buffer
pub(crate) const INITIAL_LINE_CAPACITY: usize = 64 * 1024;
/// Longest line accepted before the stream is treated as broken
pub(crate) const MAX_LINE_BYTES: usize = 1024 * 1024;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// How event payloads are laid out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Only `data:` lines carry payloads; `[DONE]` ends the stream
    ServerSentEvents,
    /// `data:` is optional and only lines opening a JSON object are payloads.
    /// There is no sentinel, the stream ends when the body closes.
    JsonObjects,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    Skip,
    Done,
    Payload(&'a [u8]),
}

impl Framing {
    pub(crate) fn frame(self, line: &[u8]) -> Frame<'_> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Frame::Skip;
        }
        match self {
            Self::ServerSentEvents => {
                let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                    return Frame::Skip;
                };
                let data = data.trim_ascii();
                if data == DONE_SENTINEL {
                    Frame::Done
                } else if data.is_empty() {
                    Frame::Skip
                } else {
                    Frame::Payload(data)
                }
            }
            Self::JsonObjects => {
                let data = line.strip_prefix(DATA_PREFIX).map_or(line, <[u8]>::trim_ascii);
                if data.starts_with(b"{") {
                    Frame::Payload(data)
                } else {
                    Frame::Skip
                }
            }
        }
    }
}

/// What a single decoded chunk contributes to the response
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ChunkUpdate {
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub delta: String,
}

/// Decode one payload as a provider chunk; failures are fatal to the stream
pub(crate) fn parse_chunk<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ChatError> {
    serde_json::from_slice(payload).map_err(|e| ChatError::decode("decode stream chunk", e))
}

/// Running state of one streaming call
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    response: ChatResponse,
    deltas: usize,
}

impl StreamAccumulator {
    /// Fold `update` in. Model and finish reason are sticky: the last non-empty value wins.
    pub(crate) fn apply(
        &mut self,
        update: ChunkUpdate,
        handler: &mut StreamHandler<'_>,
    ) -> Result<(), ChatError> {
        if let Some(model) = update.model.filter(|m| !m.is_empty()) {
            self.response.model = model;
        }
        if let Some(reason) = update.finish_reason.filter(|r| !r.is_empty()) {
            self.response.finish_reason = reason;
        }
        if update.delta.is_empty() {
            return Ok(());
        }
        self.response.content.push_str(&update.delta);
        self.deltas += 1;
        handler(&update.delta).map_err(ChatError::Handler)
    }

    pub(crate) fn finish(self) -> ChatResponse {
        self.response
    }
}

/// Split a response body into lines with a bounded per-line buffer.
///
/// Line terminators (`\n` or `\r\n`) are removed and a final line without a
/// terminator is still yielded.
pub(crate) fn lines<S, E>(body: S) -> impl Stream<Item = Result<String, ChatError>> + Unpin
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    let reader = StreamReader::new(body.map(|chunk| {
        chunk.map_err(|e| {
            let source: BoxError = e.into();
            io::Error::other(source)
        })
    }));
    FramedRead::with_capacity(
        reader,
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        INITIAL_LINE_CAPACITY,
    )
    .map(|line| line.map_err(read_error))
}

fn read_error(err: LinesCodecError) -> ChatError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => ChatError::transport(
            "read stream",
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream line exceeds {MAX_LINE_BYTES} bytes"),
            ),
        ),
        LinesCodecError::Io(e) => ChatError::transport("read stream", e),
    }
}

/// Drive a streaming body to completion.
///
/// Ends on body close or sentinel (normal), or on the first read, decode,
/// provider or handler error. Every body read is raced against `cancel`.
pub(crate) async fn consume<S, E, D>(
    provider: &'static str,
    framing: Framing,
    body: S,
    mut decode: D,
    handler: &mut StreamHandler<'_>,
    cancel: &CancellationToken,
) -> Result<ChatResponse, ChatError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
    D: FnMut(&[u8]) -> Result<ChunkUpdate, ChatError>,
{
    let mut body_lines = lines(body);
    let mut state = StreamAccumulator::default();

    while let Some(line) =
        cancellable(provider, cancel, async { body_lines.next().await.transpose() }).await?
    {
        match framing.frame(line.as_bytes()) {
            Frame::Skip => continue,
            Frame::Done => {
                debug!("{} stream reached sentinel", provider);
                break;
            }
            Frame::Payload(payload) => state.apply(decode(payload)?, handler)?,
        }
    }

    debug!(
        "{} stream finished: deltas={}, model={:?}, finish_reason={:?}",
        provider, state.deltas, state.response.model, state.response.finish_reason
    );
    Ok(state.finish())
}
