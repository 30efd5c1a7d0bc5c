use std::time::Duration;

use reqwest::RequestBuilder;
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::GatewayError;

const MAX_BACKOFF_SHIFT: u32 = 5;

/// Retries for the HTTP send only. A response whose body is already being
/// streamed is never retried, and neither are job-level failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 150)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// `build_request` is called once per attempt so every attempt carries its
/// own freshly built headers.
pub async fn send_with_retry<F>(
    mut build_request: F,
    retry_policy: RetryPolicy,
) -> Result<reqwest::Response, GatewayError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;

    loop {
        match build_request().send().await {
            Ok(response) => {
                let status = response.status();
                if should_retry_status(status) && attempt < retry_policy.max_retries {
                    let delay = retry_policy.delay_for_attempt(attempt);
                    debug!(%status, attempt, ?delay, "retrying upstream request");
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                return Ok(response);
            }
            Err(error) => {
                if should_retry_error(&error) && attempt < retry_policy.max_retries {
                    let delay = retry_policy.delay_for_attempt(attempt);
                    debug!(%error, attempt, ?delay, "retrying upstream request");
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                return Err(GatewayError::Transport(error));
            }
        }
    }
}

/// Reads a non-streaming JSON body, mapping non-2xx statuses to
/// [`GatewayError::Upstream`].
pub async fn parse_json_response(
    response: reqwest::Response,
) -> Result<serde_json::Value, GatewayError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(GatewayError::upstream(status, text));
    }

    serde_json::from_str(&text)
        .map_err(|_| GatewayError::Decode("Upstream returned invalid JSON".to_string()))
}

/// Fails fast on a non-2xx streaming response, before its body is handed to
/// the stream normalizer.
pub async fn ensure_stream_ok(
    response: reqwest::Response,
) -> Result<reqwest::Response, GatewayError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(error) => {
            warn!(%status, %error, "failed to read upstream error body");
            String::new()
        }
    };
    Err(GatewayError::upstream(status, body))
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn should_retry_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps_shift() {
        let policy = RetryPolicy::new(10, 100);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(3_200));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(3_200));
    }

    fn response(status: u16, body: reqwest::Body) -> reqwest::Response {
        let response = axum::http::Response::builder()
            .status(status)
            .body(body)
            .expect("response");
        reqwest::Response::from(response)
    }

    #[tokio::test]
    async fn error_status_keeps_upstream_body() {
        let error = ensure_stream_ok(response(429, reqwest::Body::from("slow down")))
            .await
            .expect_err("429");

        assert!(matches!(
            error,
            GatewayError::Upstream { status, ref body } if status.as_u16() == 429 && body == "slow down"
        ));
    }

    #[tokio::test]
    async fn unreadable_error_body_still_reports_status() {
        let body = reqwest::Body::wrap_stream(futures_util::stream::iter(vec![Err::<
            bytes::Bytes,
            std::io::Error,
        >(
            std::io::Error::other("connection reset"),
        )]));

        let error = ensure_stream_ok(response(502, body))
            .await
            .expect_err("502");

        assert!(matches!(
            error,
            GatewayError::Upstream { status, ref body } if status.as_u16() == 502 && body.is_empty()
        ));
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
        assert!(!should_retry_status(StatusCode::NOT_FOUND));
    }
}
