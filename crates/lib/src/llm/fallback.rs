//! Ordered fallback over providers: first success wins, every failure advances.

use super::{GeminiClient, OllamaClient, OpenAiClient, Provider, ProviderError};
use crate::config::{self, Config};
use std::sync::Arc;

/// Successful reply and the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub provider: String,
    pub text: String,
}

/// Every provider in the chain failed. Carries the last observed failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all {tried} provider(s) exhausted; last failure from {provider}: {last}")]
pub struct Exhausted {
    pub provider: String,
    pub last: ProviderError,
    pub tried: usize,
}

/// Try `providers` strictly in order, once each. Stops at the first success; when every
/// provider fails returns the last failure.
pub async fn ask_with_fallback(
    providers: &[Arc<dyn Provider>],
    prompt: &str,
    system: Option<&str>,
) -> Result<ProviderReply, Exhausted> {
    let mut last: Option<(String, ProviderError)> = None;
    for provider in providers {
        let name = provider.name().to_string();
        match provider.ask(prompt, system).await {
            Ok(text) => {
                log::debug!("llm: {} answered", name);
                return Ok(ProviderReply {
                    provider: name,
                    text,
                });
            }
            Err(e) => {
                if e.is_transport_failure() {
                    log::warn!("llm: provider {} failed ({}): {}", name, e.kind(), e);
                } else {
                    log::info!("llm: provider {} rejected request ({}): {}", name, e.kind(), e);
                }
                last = Some((name, e));
            }
        }
    }
    let (provider, last) = last.unwrap_or_else(|| {
        (
            "none".to_string(),
            ProviderError::NotConfigured("no providers in chain".to_string()),
        )
    });
    Err(Exhausted {
        provider,
        last,
        tried: providers.len(),
    })
}

/// The configured provider chain. Cheap to clone.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Build providers in `providers.order`; unknown names are skipped.
    /// Providers whose key is missing stay in the chain and fail with NotConfigured.
    pub fn from_config(config: &Config) -> Self {
        let p = &config.providers;
        let timeout = p.timeout();
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        for name in &p.order {
            match name.trim().to_lowercase().as_str() {
                "gemini" => providers.push(Arc::new(GeminiClient::new(
                    config::resolve_gemini_key(config),
                    p.gemini.model.clone(),
                    p.gemini.base_url.clone(),
                    timeout,
                ))),
                "openai" => providers.push(Arc::new(OpenAiClient::new(
                    config::resolve_openai_key(config),
                    p.openai.model.clone(),
                    p.openai.base_url.clone(),
                    timeout,
                ))),
                "ollama" => providers.push(Arc::new(OllamaClient::new(
                    p.ollama.base_url.clone(),
                    p.ollama.model.clone(),
                    timeout,
                ))),
                other => log::warn!("llm: unknown provider {:?} in providers.order, skipping", other),
            }
        }
        Self::new(providers)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn ask(&self, prompt: &str, system: Option<&str>) -> Result<ProviderReply, Exhausted> {
        ask_with_fallback(&self.providers, prompt, system).await
    }
}
