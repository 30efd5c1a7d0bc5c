use std::fmt::Display;
use std::pin::Pin;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::GatewayError;

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Reassembles lines from chunks that are not aligned to line boundaries.
///
/// Bytes are buffered undecoded, so a multi-byte character split across two
/// chunks is decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, without the
    /// `\n` or `\r\n` terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_from = self.pending.len();
        let mut consumed = 0;
        self.pending.extend_from_slice(chunk);

        while let Some(offset) = self.pending[search_from..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = search_from + offset;
            let mut line = &self.pending[consumed..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            consumed = end + 1;
            search_from = consumed;
        }

        if consumed > 0 {
            self.pending.drain(..consumed);
        }

        lines
    }

    /// Flushes an unterminated trailing line at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let line = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Turns a chunked body into a stream of complete lines. A read fault is
/// yielded as [`GatewayError::Read`] and ends the stream; the buffered
/// partial line is discarded in that case.
pub fn lines<S, E>(body: S) -> LineStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let stream = try_stream! {
        let mut buffer = LineBuffer::new();
        futures_util::pin_mut!(body);

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| GatewayError::Read(error.to_string()))?;
            for line in buffer.push(&chunk) {
                yield line;
            }
        }

        if let Some(line) = buffer.finish() {
            yield line;
        }
    };

    Box::pin(stream)
}
