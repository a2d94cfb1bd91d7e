//! Parsing of streamed Messages API bodies.
//!
//! The transport hands over the complete body once the exchange is done; it
//! is then walked line by line as SSE records (`data: <json>`). Each
//! `content_block_delta` becomes one chunk. Bodies without any recognized
//! event fall back to the non-streaming response shape.

use serde_json::Value;
use tracing::debug;

use crate::error::RequestError;
use crate::models::MessageResponse;

/// What a single line did to the stream
#[derive(Debug, Clone, PartialEq)]
pub enum LineEffect {
    None,
    Chunk(String),
    Done,
    Failed(RequestError),
}

/// Per-request stream bookkeeping. Lives only as long as one body parse.
#[derive(Debug, Default)]
pub struct StreamState {
    accumulated: String,
    is_streaming: bool,
    saw_event: bool, // any recognized `type` seen so far
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn saw_event(&self) -> bool {
        self.saw_event
    }

    pub fn into_text(self) -> String {
        self.accumulated
    }

    /// Feed one line of the body.
    pub fn feed_line(&mut self, line: &str) -> LineEffect {
        let line = line.trim_end_matches('\r');
        // event:, id:, comments and blanks carry nothing we need
        let Some(payload) = line.strip_prefix("data:") else {
            return LineEffect::None;
        };
        let payload = payload.trim_start();

        if payload == "[DONE]" {
            self.saw_event = true;
            self.is_streaming = false;
            return LineEffect::Done;
        }

        let event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping non-JSON data line");
                return LineEffect::None;
            }
        };

        let Some(event_type) = event["type"].as_str() else {
            return LineEffect::None;
        };

        match event_type {
            "message_start" => {
                self.saw_event = true;
                self.is_streaming = true;
                LineEffect::None
            }
            "content_block_start" | "content_block_stop" | "message_delta" | "ping" => {
                self.saw_event = true;
                LineEffect::None
            }
            "content_block_delta" => {
                self.saw_event = true;
                match event["delta"]["text"].as_str() {
                    Some(text) => {
                        self.accumulated.push_str(text);
                        LineEffect::Chunk(text.to_string())
                    }
                    // e.g. input_json_delta
                    None => LineEffect::None,
                }
            }
            "message_stop" => {
                self.saw_event = true;
                self.is_streaming = false;
                LineEffect::Done
            }
            "error" => {
                self.saw_event = true;
                self.is_streaming = false;
                let kind = event["error"]["type"].as_str().unwrap_or("unknown");
                let message = event["error"]["message"].as_str().unwrap_or("no message");
                LineEffect::Failed(RequestError::Api {
                    kind: kind.to_string(),
                    message: message.to_string(),
                })
            }
            other => {
                debug!(event_type = other, "ignoring unknown stream event");
                LineEffect::None
            }
        }
    }
}

/// Parse a whole response body, calling `on_chunk` for every text delta in
/// order. Returns the full text on success.
pub fn parse_body(body: &str, mut on_chunk: impl FnMut(&str)) -> Result<String, RequestError> {
    let mut state = StreamState::new();

    for line in body.lines() {
        match state.feed_line(line) {
            LineEffect::None => {}
            LineEffect::Chunk(text) => on_chunk(&text),
            LineEffect::Done => return finish(state.into_text()),
            LineEffect::Failed(err) => return Err(err),
        }
    }

    if state.saw_event() {
        debug!("stream ended without a terminal event");
        return finish(state.into_text());
    }

    // Not a stream at all - try the plain response shape
    let parsed: MessageResponse = serde_json::from_str(body.trim())
        .map_err(|e| RequestError::ParseFailure(e.to_string()))?;
    let text = parsed.text();
    if text.is_empty() {
        return Err(RequestError::ParseFailure("response has no text content".to_string()));
    }
    on_chunk(&text);
    Ok(text)
}

fn finish(text: String) -> Result<String, RequestError> {
    if text.is_empty() {
        Err(RequestError::ParseFailure("stream contained no text".to_string()))
    } else {
        Ok(text)
    }
}
