use std::env;
use std::time::Duration;

use crate::error::GatewayError;
use crate::job::PollPolicy;
use crate::sdk::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub openai_base_url: String,
    pub anthropic_base_url: String,
    pub gemini_base_url: String,
    pub openrouter_base_url: String,
    pub groq_base_url: String,
    pub deepseek_base_url: String,
    pub xai_base_url: String,
    pub mistral_base_url: String,
    pub upstream_max_retries: u32,
    pub upstream_retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_max_interval_ms: Option<u64>,
    pub poll_timeout_secs: u64,
    pub poll_max_attempts: Option<u32>,
}

impl Config {
    pub fn from_env() -> Self {
        let openai_base_url = base_url_var("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let anthropic_base_url = base_url_var("ANTHROPIC_BASE_URL", "https://api.anthropic.com");
        let gemini_base_url = base_url_var(
            "GEMINI_BASE_URL",
            "https://generativelanguage.googleapis.com/v1beta/openai",
        );
        let openrouter_base_url =
            base_url_var("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1");
        let groq_base_url = base_url_var("GROQ_BASE_URL", "https://api.groq.com/openai/v1");
        let deepseek_base_url = base_url_var("DEEPSEEK_BASE_URL", "https://api.deepseek.com/v1");
        let xai_base_url = base_url_var("XAI_BASE_URL", "https://api.x.ai/v1");
        let mistral_base_url = base_url_var("MISTRAL_BASE_URL", "https://api.mistral.ai/v1");

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120);

        let upstream_max_retries = env::var("UPSTREAM_MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(2);

        let upstream_retry_base_delay_ms = env::var("UPSTREAM_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(150);

        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(2_000);

        let poll_max_interval_ms = env::var("POLL_MAX_INTERVAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok());

        let poll_timeout_secs = env::var("POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(600);

        let poll_max_attempts = env::var("POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0);

        Self {
            openai_base_url,
            anthropic_base_url,
            gemini_base_url,
            openrouter_base_url,
            groq_base_url,
            deepseek_base_url,
            xai_base_url,
            mistral_base_url,
            upstream_max_retries,
            upstream_retry_base_delay_ms,
            request_timeout_secs,
            poll_interval_ms,
            poll_max_interval_ms,
            poll_timeout_secs,
            poll_max_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.upstream_max_retries, self.upstream_retry_base_delay_ms)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.poll_timeout_secs),
        );

        if let Some(max_interval_ms) = self.poll_max_interval_ms {
            policy = policy.with_max_interval(Duration::from_millis(max_interval_ms));
        }

        if let Some(max_attempts) = self.poll_max_attempts {
            policy = policy.with_max_attempts(max_attempts);
        }

        policy
    }

    /// Builds the single client shared by every adapter; its pool is the only
    /// state shared between concurrent runs.
    pub fn http_client(&self) -> Result<reqwest::Client, GatewayError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(GatewayError::from)
    }
}

fn base_url_var(name: &str, default: &str) -> String {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
