use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::sdk::ProviderSdk;
use crate::sdk::jobs::JobClient;
use crate::sdk::retry::{RetryPolicy, ensure_stream_ok, send_with_retry};
use crate::stream::finish::Usage;
use crate::stream::normalize_sse;
use crate::stream::normalizer::{Citation, Extraction, MessagePartStream, Normalizer};
use crate::stream::sse::SseEvent;

/// Chat streaming for OpenAI and every vendor exposing an OpenAI-compatible
/// `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    id: &'static str,
    client: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
    videos: Option<JobClient>,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: String, retry_policy: RetryPolicy) -> Self {
        Self::compatible("openai", client, base_url, retry_policy)
    }

    pub fn compatible(
        id: &'static str,
        client: reqwest::Client,
        base_url: String,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            id,
            client,
            base_url,
            retry_policy,
            videos: None,
        }
    }

    /// Enables `generate_video` through a create-then-poll job endpoint.
    pub fn with_videos(mut self, videos: JobClient) -> Self {
        self.videos = Some(videos);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn headers(api_key: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| GatewayError::Unauthorized("Invalid API key".to_string()))?,
        );
        Ok(headers)
    }

    fn to_stream_request(mut request: Value) -> Result<Value, GatewayError> {
        if !request.is_object() {
            return Err(GatewayError::BadRequest(
                "The request body must be a JSON object".to_string(),
            ));
        }

        if request.get("model").and_then(Value::as_str).is_none() {
            return Err(GatewayError::BadRequest("Missing model".to_string()));
        }

        request["stream"] = Value::Bool(true);
        request["stream_options"] = json!({ "include_usage": true });
        Ok(request)
    }
}

#[async_trait]
impl ProviderSdk for OpenAiProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn stream_chat(
        &self,
        api_key: &str,
        request: Value,
    ) -> Result<MessagePartStream, GatewayError> {
        let body = Self::to_stream_request(request)?;
        let headers = Self::headers(api_key)?;

        let response = send_with_retry(
            || {
                self.client
                    .post(self.endpoint("/chat/completions"))
                    .headers(headers.clone())
                    .json(&body)
            },
            self.retry_policy,
        )
        .await?;
        let response = ensure_stream_ok(response).await?;

        let mut normalizer = Normalizer::new().with_extra("provider", json!(self.id));
        if let Some(temperature) = body.get("temperature").and_then(Value::as_f64) {
            normalizer = normalizer.with_temperature(temperature);
        }

        Ok(normalize_sse(
            response.bytes_stream(),
            normalizer,
            extract_chat_chunk,
        ))
    }

    async fn generate_video(
        &self,
        api_key: &str,
        request: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        match &self.videos {
            Some(videos) => videos.run(api_key, request, cancel).await,
            None => Err(GatewayError::not_supported(self.id, "video generation")),
        }
    }
}

/// Extractor for `chat.completion.chunk` payloads.
pub fn extract_chat_chunk(event: &SseEvent) -> Result<Extraction, GatewayError> {
    let chunk = serde_json::from_str::<Value>(&event.data)?;

    if let Some(error) = chunk.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Ok(Extraction::failed(message));
    }

    let mut extraction = Extraction::empty();
    let choice = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    if let Some(choice) = choice {
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        extraction.text_delta = delta
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);

        extraction.reasoning_delta = delta
            .get("reasoning_content")
            .or_else(|| delta.get("reasoning"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(annotations) = delta.get("annotations").and_then(Value::as_array) {
            extraction
                .citations
                .extend(annotations.iter().filter_map(url_citation));
        }

        extraction.finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if let Some(urls) = chunk.get("citations").and_then(Value::as_array) {
        extraction.citations.extend(
            urls.iter()
                .filter_map(Value::as_str)
                .map(|url| Citation::new(url, None)),
        );
    }

    if let Some(usage) = chunk.get("usage").filter(|usage| usage.is_object()) {
        extraction.usage = Some(parse_usage(usage));
    }

    if let Some(model) = chunk.get("model").and_then(Value::as_str) {
        let mut extra = Map::new();
        extra.insert("model".to_string(), json!(model));
        extraction.extra = Some(extra);
    }

    Ok(extraction)
}

fn url_citation(annotation: &Value) -> Option<Citation> {
    if annotation.get("type").and_then(Value::as_str) != Some("url_citation") {
        return None;
    }

    let citation = annotation.get("url_citation").unwrap_or(annotation);
    let url = citation.get("url").and_then(Value::as_str)?;
    let title = citation
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Citation::new(url, title))
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        output_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
        reasoning_tokens: usage
            .get("completion_tokens_details")
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(Value::as_u64),
    }
}
