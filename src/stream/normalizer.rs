//! Provider-agnostic state machine turning decoded payloads into canonical
//! [`MessagePart`] events.
//!
//! Guarantees for every run:
//! - a `*Delta` is always preceded by its `*Start`, and every `*Start` gets
//!   exactly one `*End`;
//! - exactly one `Finish` is emitted and it is the last part, whether the
//!   upstream signalled completion, closed the connection, or failed mid-read.
//!
//! Cancelling a run (dropping the stream) is the one exception: no closing
//! parts are produced.

use std::pin::Pin;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::message::MessagePart;
use crate::stream::finish::{FinishReason, Usage, UsageAccumulator};
use crate::stream::sse::{EventStream, SseEvent};

pub type MessagePartStream = Pin<Box<dyn Stream<Item = Result<MessagePart, GatewayError>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Citation {
    pub url: String,
    pub title: Option<String>,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: Option<String>) -> Self {
        Self {
            url: url.into(),
            title,
        }
    }
}

/// Terminal signal from the upstream. `reason` is the provider's raw value;
/// `None` falls back to a reason recorded earlier in the run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FinishSignal {
    pub reason: Option<String>,
}

/// What an extractor found in one payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub text_delta: Option<String>,
    pub reasoning_delta: Option<String>,
    pub citations: Vec<Citation>,
    /// Non-terminal finish reason, e.g. OpenAI's `finish_reason` that
    /// arrives before the trailing usage chunk.
    pub finish_reason: Option<String>,
    pub finish_signal: Option<FinishSignal>,
    pub usage: Option<Usage>,
    pub error: Option<String>,
    pub extra: Option<Map<String, Value>>,
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text_delta: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self {
            reasoning_delta: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn citation(citation: Citation) -> Self {
        Self {
            citations: vec![citation],
            ..Self::default()
        }
    }

    pub fn finished(reason: Option<&str>) -> Self {
        Self {
            finish_signal: Some(FinishSignal {
                reason: reason.map(str::to_string),
            }),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_finish_signal(mut self, reason: Option<&str>) -> Self {
        self.finish_signal = Some(FinishSignal {
            reason: reason.map(str::to_string),
        });
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }
}

/// Provider-specific mapping from one decoded payload to an [`Extraction`].
///
/// Returning `Err` marks the payload as malformed: it is logged and skipped,
/// and the run continues.
pub trait Extractor: Send {
    fn extract(&mut self, event: &SseEvent) -> Result<Extraction, GatewayError>;
}

impl<F> Extractor for F
where
    F: FnMut(&SseEvent) -> Result<Extraction, GatewayError> + Send,
{
    fn extract(&mut self, event: &SseEvent) -> Result<Extraction, GatewayError> {
        self(event)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamState {
    pub text_id: Option<String>,
    pub text_open: bool,
    pub reasoning_id: Option<String>,
    pub reasoning_open: bool,
    pub usage: UsageAccumulator,
    pub finish_reason: Option<String>,
    pub saw_terminal_signal: bool,
}

#[derive(Debug, Default)]
pub struct Normalizer {
    state: StreamState,
    temperature: Option<f64>,
    extra: Map<String, Value>,
    finished: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// True once `Finish` has been emitted; further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, extraction: Extraction) -> Vec<MessagePart> {
        let mut parts = Vec::new();
        if self.finished {
            return parts;
        }

        if let Some(delta) = extraction.reasoning_delta.filter(|delta| !delta.is_empty()) {
            let id = self.open_reasoning(&mut parts);
            parts.push(MessagePart::ReasoningDelta { id, delta });
        }

        if let Some(delta) = extraction.text_delta.filter(|delta| !delta.is_empty()) {
            let id = self.open_text(&mut parts);
            parts.push(MessagePart::TextDelta { id, delta });
        }

        for citation in extraction.citations {
            parts.push(MessagePart::Citation {
                url: citation.url,
                title: citation.title,
            });
        }

        if let Some(usage) = extraction.usage {
            self.state.usage.merge(usage);
        }

        if let Some(extra) = extraction.extra {
            self.extra.extend(extra);
        }

        if let Some(reason) = extraction.finish_reason {
            self.state.finish_reason = Some(reason);
        }

        if let Some(message) = extraction.error {
            parts.extend(self.fail(message));
            return parts;
        }

        if let Some(signal) = extraction.finish_signal {
            if signal.reason.is_some() {
                self.state.finish_reason = signal.reason;
            }
            self.state.saw_terminal_signal = true;
            let reason = FinishReason::from_provider(self.state.finish_reason.as_deref());
            parts.extend(self.close(reason));
        }

        parts
    }

    /// Closes the run when the input ends without a terminal signal.
    pub fn finish(&mut self) -> Vec<MessagePart> {
        if self.finished {
            return Vec::new();
        }

        if !self.state.saw_terminal_signal {
            debug!(
                text_open = self.state.text_open,
                reasoning_open = self.state.reasoning_open,
                "stream ended without terminal signal"
            );
        }

        let reason = FinishReason::from_provider(self.state.finish_reason.as_deref());
        self.close(reason)
    }

    /// Closes the run with an `Error` part followed by `Finish(error)`.
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<MessagePart> {
        if self.finished {
            return Vec::new();
        }

        let mut parts = self.close_sub_streams();
        parts.push(MessagePart::error(message));
        parts.push(self.finish_part(FinishReason::Error));
        self.finished = true;
        parts
    }

    /// Drives the state machine over a decoded event stream.
    pub fn run<X>(mut self, events: EventStream, mut extractor: X) -> MessagePartStream
    where
        X: Extractor + 'static,
    {
        let stream = stream! {
            let mut events = events;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        warn!(%error, "upstream stream failed, closing run");
                        for part in self.fail(error.to_string()) {
                            yield Ok(part);
                        }
                        break;
                    }
                };

                let extraction = match extractor.extract(&event) {
                    Ok(extraction) => extraction,
                    Err(error) => {
                        warn!(%error, event = ?event.event, "skipping malformed payload");
                        continue;
                    }
                };

                for part in self.apply(extraction) {
                    yield Ok(part);
                }

                if self.is_finished() {
                    break;
                }
            }

            for part in self.finish() {
                yield Ok(part);
            }
        };

        Box::pin(stream)
    }

    fn open_text(&mut self, parts: &mut Vec<MessagePart>) -> String {
        let id = self
            .state
            .text_id
            .get_or_insert_with(|| format!("txt_{}", Uuid::new_v4().simple()))
            .clone();

        if !self.state.text_open {
            self.state.text_open = true;
            parts.push(MessagePart::TextStart { id: id.clone() });
        }

        id
    }

    fn open_reasoning(&mut self, parts: &mut Vec<MessagePart>) -> String {
        let id = self
            .state
            .reasoning_id
            .get_or_insert_with(|| format!("rsn_{}", Uuid::new_v4().simple()))
            .clone();

        if !self.state.reasoning_open {
            self.state.reasoning_open = true;
            parts.push(MessagePart::ReasoningStart { id: id.clone() });
        }

        id
    }

    fn close(&mut self, reason: FinishReason) -> Vec<MessagePart> {
        let mut parts = self.close_sub_streams();
        parts.push(self.finish_part(reason));
        self.finished = true;
        parts
    }

    fn close_sub_streams(&mut self) -> Vec<MessagePart> {
        let mut parts = Vec::new();

        if self.state.text_open {
            self.state.text_open = false;
            if let Some(id) = self.state.text_id.clone() {
                parts.push(MessagePart::TextEnd { id });
            }
        }

        if self.state.reasoning_open {
            self.state.reasoning_open = false;
            if let Some(id) = self.state.reasoning_id.clone() {
                parts.push(MessagePart::ReasoningEnd { id });
            }
        }

        parts
    }

    fn finish_part(&self, reason: FinishReason) -> MessagePart {
        let usage = &self.state.usage;
        MessagePart::Finish {
            reason,
            input_tokens: usage.input_tokens(),
            output_tokens: usage.output_tokens(),
            total_tokens: usage.total_tokens(),
            reasoning_tokens: usage.reasoning_tokens(),
            temperature: self.temperature,
            extra: (!self.extra.is_empty()).then(|| self.extra.clone()),
        }
    }
}
