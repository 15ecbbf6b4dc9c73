//! Server-sent-event codec for ORBIT chat responses.
//!
//! The server frames every record as `data: <json>\n\n`. Two payload shapes
//! exist: raw ORBIT chunks (`response`, `audio_chunk`, `done`, ...) and
//! JSON-RPC envelopes (`result.type` = `start` | `chunk` | `complete`).
//! A literal `[DONE]` payload also ends the stream.
//!
//! A `complete` envelope repeats the assistant text in `output.messages`.
//! When no `chunk` frame came before it (moderation blocks, server-side
//! errors) that text is the whole reply.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::chat::client::{ResponseChunk, ResponseStream};
use crate::chat::core::errors::{ChatError, ChatResult};

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event.
enum Frame {
    Chunk(ResponseChunk),
    /// JSON-RPC `complete` with the last assistant content, if any.
    Complete(Option<String>),
}

impl Frame {
    fn into_chunk(self, streamed_text: bool) -> ResponseChunk {
        match self {
            Self::Chunk(chunk) => chunk,
            Self::Complete(content) if !streamed_text => ResponseChunk {
                response: content,
                done: true,
                ..ResponseChunk::default()
            },
            Self::Complete(_) => ResponseChunk::done(),
        }
    }
}

/// Incremental decoder turning raw body bytes into response chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    streamed_text: bool,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every chunk completed by them.
    ///
    /// # Errors
    /// Returns an error if a completed event is not valid UTF-8 or JSON.
    pub fn push(&mut self, bytes: &[u8]) -> ChatResult<Vec<ResponseChunk>> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();

        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let text = std::str::from_utf8(&event)
                .map_err(|err| ChatError::Decode(format!("invalid utf-8 in event: {err}")))?;
            if let Some(frame) = decode_frame(text)? {
                chunks.push(self.admit(frame));
            }
        }

        Ok(chunks)
    }

    fn admit(&mut self, frame: Frame) -> ResponseChunk {
        let chunk = frame.into_chunk(self.streamed_text);
        if chunk.response.as_deref().is_some_and(|r| !r.is_empty()) {
            self.streamed_text = true;
        }
        chunk
    }

    /// Flush a trailing event that was not terminated by a blank line.
    ///
    /// # Errors
    /// Returns an error if the trailing event is malformed.
    pub fn finish(mut self) -> ChatResult<Option<ResponseChunk>> {
        let buffer = std::mem::take(&mut self.buffer);
        let text = String::from_utf8(buffer)
            .map_err(|err| ChatError::Decode(format!("invalid utf-8 in event: {err}")))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(decode_frame(&text)?.map(|frame| self.admit(frame)))
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Decode one event block (without its terminating blank line).
///
/// Returns `None` for comments, keep-alives and JSON-RPC `start` frames.
/// Without stream context a `complete` envelope keeps its content; use
/// [`SseDecoder`] to drop it once text has streamed.
///
/// # Errors
/// Returns an error if the data payload is not valid JSON.
pub fn decode_event(event: &str) -> ChatResult<Option<ResponseChunk>> {
    Ok(decode_frame(event)?.map(|frame| frame.into_chunk(false)))
}

fn decode_frame(event: &str) -> ChatResult<Option<Frame>> {
    let data: Vec<&str> = event
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return Ok(None);
    }

    let payload = data.join("\n");
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    if payload == DONE_SENTINEL {
        return Ok(Some(Frame::Chunk(ResponseChunk::done())));
    }

    let value: Value = serde_json::from_str(payload)?;
    if value.get("jsonrpc").is_some() {
        return Ok(decode_jsonrpc(&value));
    }
    Ok(Some(Frame::Chunk(serde_json::from_value(value)?)))
}

fn decode_jsonrpc(value: &Value) -> Option<Frame> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        return Some(Frame::Chunk(ResponseChunk {
            error: Some(message),
            done: true,
            ..ResponseChunk::default()
        }));
    }

    let result = value.get("result")?;
    match result.get("type").and_then(Value::as_str) {
        Some("chunk") => result
            .get("chunk")
            .and_then(|c| c.get("content"))
            .and_then(Value::as_str)
            .map(|content| Frame::Chunk(ResponseChunk::text(content))),
        Some("complete") => Some(Frame::Complete(completion_content(result))),
        _ => None,
    }
}

/// Last assistant `content` in `output.messages`.
fn completion_content(result: &Value) -> Option<String> {
    result
        .get("output")?
        .get("messages")?
        .as_array()?
        .iter()
        .rev()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .find_map(|m| m.get("content").and_then(Value::as_str))
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<ChatResult<ResponseChunk>>,
    finished: bool,
}

/// Adapt a byte stream (e.g. an HTTP body) into a [`ResponseStream`].
///
/// The stream ends after the first error.
pub fn decode_stream<S, B, E>(bytes: S) -> ResponseStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(bytes)) => match st.decoder.push(bytes.as_ref()) {
                    Ok(chunks) => st.pending.extend(chunks.into_iter().map(Ok)),
                    Err(err) => {
                        st.pending.push_back(Err(err));
                        st.finished = true;
                    }
                },
                Some(Err(err)) => {
                    st.pending.push_back(Err(err.into()));
                    st.finished = true;
                }
                None => {
                    st.finished = true;
                    match std::mem::take(&mut st.decoder).finish() {
                        Ok(Some(chunk)) => st.pending.push_back(Ok(chunk)),
                        Ok(None) => {}
                        Err(err) => st.pending.push_back(Err(err)),
                    }
                }
            }
        }
    })
    .boxed()
}
