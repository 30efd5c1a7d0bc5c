use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Map, Value, json};

use crate::error::GatewayError;
use crate::sdk::ProviderSdk;
use crate::sdk::retry::{RetryPolicy, ensure_stream_ok, send_with_retry};
use crate::stream::finish::Usage;
use crate::stream::normalize_sse;
use crate::stream::normalizer::{Citation, Extraction, MessagePartStream, Normalizer};
use crate::stream::sse::SseEvent;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 1024;

#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, base_url: String, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            base_url,
            retry_policy,
        }
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
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|_| GatewayError::Unauthorized("Invalid API key".to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    /// Maps an OpenAI-style chat request onto the Messages API.
    fn to_anthropic_request(request: &Value) -> Result<Value, GatewayError> {
        let model = request
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::BadRequest("Missing model".to_string()))?;

        let messages = request
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::BadRequest("Missing messages".to_string()))?;

        let mut system_messages = Vec::new();
        let mut anthropic_messages = Vec::new();

        for message in messages {
            let role = message
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or("user");
            let content = extract_text_content(message.get("content").unwrap_or(&Value::Null));

            if content.trim().is_empty() {
                continue;
            }

            match role {
                "system" | "developer" => system_messages.push(content),
                "user" | "assistant" => anthropic_messages.push(json!({
                    "role": role,
                    "content": [{ "type": "text", "text": content }]
                })),
                _ => {}
            }
        }

        if anthropic_messages.is_empty() {
            return Err(GatewayError::BadRequest(
                "At least one user or assistant message is required".to_string(),
            ));
        }

        let max_tokens = request
            .get("max_tokens")
            .and_then(Value::as_u64)
            .or_else(|| request.get("max_completion_tokens").and_then(Value::as_u64))
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "model": model,
            "messages": anthropic_messages,
            "max_tokens": max_tokens,
            "stream": true,
        });

        if let Some(temperature) = request.get("temperature").and_then(Value::as_f64) {
            body["temperature"] = json!(temperature);
        }

        if let Some(top_p) = request.get("top_p").and_then(Value::as_f64) {
            body["top_p"] = json!(top_p);
        }

        if let Some(budget) = request
            .get("thinking")
            .and_then(|thinking| thinking.get("budget_tokens"))
            .and_then(Value::as_u64)
        {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }

        if !system_messages.is_empty() {
            body["system"] = json!(system_messages.join("\n\n"));
        }

        Ok(body)
    }
}

#[async_trait]
impl ProviderSdk for AnthropicProvider {
    fn id(&self) -> &'static str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        api_key: &str,
        request: Value,
    ) -> Result<MessagePartStream, GatewayError> {
        let body = Self::to_anthropic_request(&request)?;
        let headers = Self::headers(api_key)?;

        let response = send_with_retry(
            || {
                self.client
                    .post(self.endpoint("/v1/messages"))
                    .headers(headers.clone())
                    .json(&body)
            },
            self.retry_policy,
        )
        .await?;
        let response = ensure_stream_ok(response).await?;

        let mut normalizer = Normalizer::new().with_extra("provider", json!("anthropic"));
        if let Some(temperature) = body.get("temperature").and_then(Value::as_f64) {
            normalizer = normalizer.with_temperature(temperature);
        }

        Ok(normalize_sse(
            response.bytes_stream(),
            normalizer,
            extract_message_event,
        ))
    }
}

/// Extractor for Messages API stream events. The SSE `event:` name is
/// preferred; the payload's own `type` covers proxies that drop it.
pub fn extract_message_event(event: &SseEvent) -> Result<Extraction, GatewayError> {
    let data = serde_json::from_str::<Value>(&event.data)?;
    let kind = event
        .event_name()
        .or_else(|| data.get("type").and_then(Value::as_str))
        .unwrap_or_default();

    let extraction = match kind {
        "message_start" => {
            let message = data.get("message").unwrap_or(&Value::Null);
            let mut extraction = Extraction::empty();
            if let Some(usage) = message.get("usage") {
                extraction.usage = Some(parse_usage(usage));
            }

            let mut extra = Map::new();
            for key in ["id", "model"] {
                if let Some(value) = message.get(key).and_then(Value::as_str) {
                    extra.insert(key.to_string(), json!(value));
                }
            }
            if !extra.is_empty() {
                extraction.extra = Some(extra);
            }
            extraction
        }
        "content_block_start" => {
            let block = data.get("content_block").unwrap_or(&Value::Null);
            match block.get("type").and_then(Value::as_str) {
                Some("text") => text_field(block, "text").map_or_else(Extraction::empty, Extraction::text),
                Some("thinking") => {
                    text_field(block, "thinking").map_or_else(Extraction::empty, Extraction::reasoning)
                }
                _ => Extraction::empty(),
            }
        }
        "content_block_delta" => {
            let delta = data.get("delta").unwrap_or(&Value::Null);
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => {
                    text_field(delta, "text").map_or_else(Extraction::empty, Extraction::text)
                }
                Some("thinking_delta") => {
                    text_field(delta, "thinking").map_or_else(Extraction::empty, Extraction::reasoning)
                }
                Some("citations_delta") => delta
                    .get("citation")
                    .and_then(web_citation)
                    .map_or_else(Extraction::empty, Extraction::citation),
                _ => Extraction::empty(),
            }
        }
        "message_delta" => {
            let mut extraction = Extraction::empty();
            extraction.finish_reason = data
                .get("delta")
                .and_then(|delta| delta.get("stop_reason"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(usage) = data.get("usage") {
                extraction.usage = Some(parse_usage(usage));
            }
            extraction
        }
        "message_stop" => Extraction::finished(None),
        "error" => {
            let message = data
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Anthropic stream error");
            Extraction::failed(message)
        }
        _ => Extraction::empty(),
    };

    Ok(extraction)
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn web_citation(citation: &Value) -> Option<Citation> {
    let url = citation.get("url").and_then(Value::as_str)?;
    let title = citation
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Citation::new(url, title))
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
        output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        total_tokens: None,
        reasoning_tokens: None,
    }
}

fn extract_text_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if let Some(text) = item.as_str() {
                    return Some(text.to_string());
                }

                item.get("text").and_then(Value::as_str).map(str::to_string)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
