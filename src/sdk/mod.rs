pub mod anthropic;
pub mod jobs;
pub mod openai;
pub mod retry;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::stream::normalizer::MessagePartStream;

/// Capability set every provider adapter exposes. Anything an adapter does
/// not override answers [`GatewayError::NotSupported`], so routing code can
/// tell "unsupported" apart from a failed call.
#[async_trait]
pub trait ProviderSdk: Send + Sync {
    fn id(&self) -> &'static str;

    async fn stream_chat(
        &self,
        _api_key: &str,
        _request: Value,
    ) -> Result<MessagePartStream, GatewayError> {
        Err(GatewayError::not_supported(self.id(), "chat streaming"))
    }

    async fn generate_image(
        &self,
        _api_key: &str,
        _request: Value,
        _cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        Err(GatewayError::not_supported(self.id(), "image generation"))
    }

    async fn generate_video(
        &self,
        _api_key: &str,
        _request: Value,
        _cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        Err(GatewayError::not_supported(self.id(), "video generation"))
    }

    async fn generate_speech(&self, _api_key: &str, _request: Value) -> Result<Bytes, GatewayError> {
        Err(GatewayError::not_supported(self.id(), "speech generation"))
    }

    async fn transcribe(
        &self,
        _api_key: &str,
        _audio: Bytes,
        _request: Value,
    ) -> Result<Value, GatewayError> {
        Err(GatewayError::not_supported(self.id(), "transcription"))
    }
}
