use async_stream::stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::stream::normalizer::MessagePartStream;

/// Stops `inner` as soon as `token` fires, yielding a single
/// [`GatewayError::Cancelled`]. Dropping `inner` releases the upstream body.
pub fn cancellable(inner: MessagePartStream, token: CancellationToken) -> MessagePartStream {
    let stream = stream! {
        let mut inner = inner;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    yield Err(GatewayError::Cancelled);
                    break;
                }
                item = inner.next() => {
                    let Some(item) = item else { break };
                    yield item;
                }
            }
        }
    };

    Box::pin(stream)
}
