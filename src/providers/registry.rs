use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::GatewayError;
use crate::sdk::ProviderSdk;
use crate::sdk::anthropic::AnthropicProvider;
use crate::sdk::jobs::{JobApi, JobClient};
use crate::sdk::openai::OpenAiProvider;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    OpenRouter,
    Groq,
    DeepSeek,
    XAi,
    Mistral,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::XAi => "xai",
            Self::Mistral => "mistral",
        }
    }

    pub fn all_kinds() -> [Self; 8] {
        [
            Self::OpenAi,
            Self::Anthropic,
            Self::Gemini,
            Self::OpenRouter,
            Self::Groq,
            Self::DeepSeek,
            Self::XAi,
            Self::Mistral,
        ]
    }

    /// Routes `provider/model` by prefix, then bare model names by family.
    /// Anything unrecognised goes to OpenAI.
    pub fn resolve_model(model: &str) -> (Self, String) {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(kind) = Self::parse(prefix) {
                return (kind, rest.to_string());
            }
        }

        let lower = model.to_ascii_lowercase();
        let kind = if lower.starts_with("claude") {
            Self::Anthropic
        } else if lower.starts_with("gemini") {
            Self::Gemini
        } else if lower.starts_with("deepseek") {
            Self::DeepSeek
        } else if lower.starts_with("grok") {
            Self::XAi
        } else if lower.starts_with("mistral")
            || lower.starts_with("ministral")
            || lower.starts_with("codestral")
        {
            Self::Mistral
        } else {
            Self::OpenAi
        };

        (kind, model.to_string())
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "openrouter" => Some(Self::OpenRouter),
            "groq" => Some(Self::Groq),
            "deepseek" => Some(Self::DeepSeek),
            "xai" => Some(Self::XAi),
            "mistral" => Some(Self::Mistral),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ProviderSdk>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires every known provider against the configured base URLs, sharing
    /// one HTTP client.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let client = config.http_client()?;
        let retry_policy = config.retry_policy();

        let videos = JobClient::new(
            client.clone(),
            config.openai_base_url.clone(),
            JobApi::openai_videos(),
            retry_policy,
            config.poll_policy(),
        );

        let mut registry = Self::new();
        registry.register(
            ProviderKind::OpenAi,
            Arc::new(
                OpenAiProvider::new(client.clone(), config.openai_base_url.clone(), retry_policy)
                    .with_videos(videos),
            ),
        );
        registry.register(
            ProviderKind::Anthropic,
            Arc::new(AnthropicProvider::new(
                client.clone(),
                config.anthropic_base_url.clone(),
                retry_policy,
            )),
        );

        let compatible = [
            (ProviderKind::Gemini, &config.gemini_base_url),
            (ProviderKind::OpenRouter, &config.openrouter_base_url),
            (ProviderKind::Groq, &config.groq_base_url),
            (ProviderKind::DeepSeek, &config.deepseek_base_url),
            (ProviderKind::XAi, &config.xai_base_url),
            (ProviderKind::Mistral, &config.mistral_base_url),
        ];
        for (kind, base_url) in compatible {
            registry.register(
                kind,
                Arc::new(OpenAiProvider::compatible(
                    kind.id(),
                    client.clone(),
                    base_url.clone(),
                    retry_policy,
                )),
            );
        }

        Ok(registry)
    }

    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn ProviderSdk>) {
        self.providers.insert(kind, provider);
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderSdk>, GatewayError> {
        self.providers
            .get(&kind)
            .map(Arc::clone)
            .ok_or_else(|| GatewayError::BadRequest(format!("Provider {} is not configured", kind.id())))
    }

    pub fn all(&self) -> Vec<(ProviderKind, Arc<dyn ProviderSdk>)> {
        ProviderKind::all_kinds()
            .into_iter()
            .filter_map(|kind| self.providers.get(&kind).map(|provider| (kind, Arc::clone(provider))))
            .collect()
    }
}
