//! Server-sent event decoding on top of the line reader.

use std::pin::Pin;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;
use crate::stream::frame::LineStream;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, GatewayError>> + Send>>;

/// One decoded payload and the `event:` name that preceded it, if any.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(str::to_string),
            data: data.into(),
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SseFrame {
    Event(SseEvent),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending_event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.trim().is_empty() {
            self.pending_event = None;
            return None;
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(name) = line.strip_prefix("event: ") {
            self.pending_event = Some(name.trim().to_string());
            return None;
        }

        let data = line.strip_prefix("data:")?.trim();
        if is_done_marker(data) {
            return Some(SseFrame::Done);
        }

        Some(SseFrame::Event(SseEvent {
            event: self.pending_event.take(),
            data: data.to_string(),
        }))
    }
}

pub fn is_done_marker(data: &str) -> bool {
    data.eq_ignore_ascii_case("[DONE]")
}

/// Decodes `event:`/`data:` blocks. A `[DONE]` payload ends the stream.
pub fn decode(lines: LineStream) -> EventStream {
    let stream = try_stream! {
        let mut decoder = SseDecoder::new();
        let mut lines = lines;

        while let Some(line) = lines.next().await {
            match decoder.decode_line(&line?) {
                Some(SseFrame::Event(event)) => yield event,
                Some(SseFrame::Done) => break,
                None => {}
            }
        }
    };

    Box::pin(stream)
}

/// Like [`decode`], but also accepts bare JSON lines with no `data:` prefix,
/// as sent by NDJSON-style providers.
pub fn decode_ndjson(lines: LineStream) -> EventStream {
    let stream = try_stream! {
        let mut decoder = SseDecoder::new();
        let mut lines = lines;

        while let Some(line) = lines.next().await {
            let line = line?;
            let trimmed = line.trim();

            if is_done_marker(trimmed) {
                break;
            }

            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                yield SseEvent::new(None, trimmed);
                continue;
            }

            match decoder.decode_line(&line) {
                Some(SseFrame::Event(event)) => yield event,
                Some(SseFrame::Done) => break,
                None => {}
            }
        }
    };

    Box::pin(stream)
}
