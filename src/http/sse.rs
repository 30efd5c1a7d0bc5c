use std::convert::Infallible;

use async_stream::stream;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::message::MessagePart;
use crate::stream::normalizer::MessagePartStream;

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Serializes parts as `data: {json}` frames and closes with `[DONE]`. An
/// error from the part stream is written as a final `error` part.
pub fn part_event_stream(
    mut parts: MessagePartStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    stream! {
        while let Some(item) = parts.next().await {
            let (part, last) = match item {
                Ok(part) => (part, false),
                Err(error) => (MessagePart::error(error.to_string()), true),
            };

            match part.encode() {
                Ok(json) => yield Ok(Bytes::from(format!("data: {json}\n\n"))),
                Err(error) => warn!(%error, tag = part.tag(), "dropping unencodable part"),
            }

            if last {
                break;
            }
        }

        yield Ok(Bytes::from_static(DONE_FRAME));
    }
}

pub fn into_response(parts: MessagePartStream) -> Response {
    let mut response = Response::new(Body::from_stream(part_event_stream(parts)));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response.headers_mut().insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}
