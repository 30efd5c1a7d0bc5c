pub mod cancel;
pub mod finish;
pub mod frame;
pub mod normalizer;
pub mod sse;

use std::fmt::Display;

use bytes::Bytes;
use futures_util::Stream;

use crate::stream::normalizer::{Extractor, MessagePartStream, Normalizer};

/// Normalizes an SSE response body: lines, then `event:`/`data:` decoding,
/// then the normalizer state machine.
pub fn normalize_sse<S, E, X>(body: S, normalizer: Normalizer, extractor: X) -> MessagePartStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    X: Extractor + 'static,
{
    normalizer.run(sse::decode(frame::lines(body)), extractor)
}

/// Same as [`normalize_sse`] for bodies that stream bare JSON lines.
pub fn normalize_ndjson<S, E, X>(body: S, normalizer: Normalizer, extractor: X) -> MessagePartStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    X: Extractor + 'static,
{
    normalizer.run(sse::decode_ndjson(frame::lines(body)), extractor)
}
