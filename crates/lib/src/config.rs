//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.hesab/config.json`) and environment.
//! Secrets (bot token, provider API keys) are usually supplied through the environment;
//! env values override the file when set and non-empty.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Language-model providers and fallback order.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Session lifetime.
    #[serde(default)]
    pub session: SessionConfig,

    /// Assistant behavior (system prompt, model-assisted intent).
    #[serde(default)]
    pub assistant: AssistantConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8080).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN (or TELEGRAM_TOKEN) env when set.
    pub bot_token: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token).
    pub webhook_secret: Option<String>,
    /// Bot API base URL (default https://api.telegram.org). Tests point this at a local server.
    pub api_base: Option<String>,
}

/// Provider chain: order of backends and per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    /// Backend names tried in order: "gemini", "openai", "ollama".
    #[serde(default = "default_provider_order")]
    pub order: Vec<String>,

    /// Per-call timeout in seconds, applied to every provider independently.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_provider_order() -> Vec<String> {
    vec!["gemini".to_string(), "openai".to_string()]
}

fn default_provider_timeout_secs() -> u64 {
    20
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
            timeout_secs: default_provider_timeout_secs(),
            gemini: GeminiConfig::default(),
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    /// Overridden by GEMINI_API_KEY env.
    pub api_key: Option<String>,
    /// Model id (default gemini-1.5-pro-latest).
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    /// Overridden by OPENAI_API_KEY env.
    pub api_key: Option<String>,
    /// Model id (default gpt-4o-mini).
    pub model: Option<String>,
    /// Any OpenAI-compatible base, e.g. https://openrouter.ai/api/v1.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    /// Use the exact name from `ollama list` (default llama3.2:latest).
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Idle time after which a session is evicted (default 24h).
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// How often the sweeper runs (default 10 min).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Assistant behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    /// System instruction sent with general questions. None uses the built-in prompt.
    pub system_prompt: Option<String>,
    /// When true and a dataset is attached, ask the provider chain to classify messages
    /// that no keyword rule matched.
    #[serde(default)]
    pub model_intent: bool,
}

/// First non-empty trimmed value among the given env vars.
fn env_secret(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name).ok().and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
    })
}

fn config_secret(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN (or TELEGRAM_TOKEN) overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_secret(&["TELEGRAM_BOT_TOKEN", "TELEGRAM_TOKEN"])
        .or_else(|| config_secret(&config.channels.telegram.bot_token))
}

/// Resolve the webhook secret: env TELEGRAM_WEBHOOK_SECRET overrides config.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    env_secret(&["TELEGRAM_WEBHOOK_SECRET"])
        .or_else(|| config_secret(&config.channels.telegram.webhook_secret))
}

/// Resolve the Gemini API key: env GEMINI_API_KEY overrides config.
pub fn resolve_gemini_key(config: &Config) -> Option<String> {
    env_secret(&["GEMINI_API_KEY"]).or_else(|| config_secret(&config.providers.gemini.api_key))
}

/// Resolve the OpenAI-compatible API key: env OPENAI_API_KEY overrides config.
pub fn resolve_openai_key(config: &Config) -> Option<String> {
    env_secret(&["OPENAI_API_KEY"]).or_else(|| config_secret(&config.providers.openai.api_key))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HESAB_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".hesab").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (HESAB_CONFIG_PATH or ~/.hesab/config.json).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.providers.order, vec!["gemini", "openai"]);
        assert_eq!(config.providers.timeout(), Duration::from_secs(20));
        assert_eq!(config.session.ttl(), Duration::from_secs(86_400));
        assert!(!config.assistant.model_intent);
    }

    #[test]
    fn camel_case_keys_parse() {
        let json = r#"{
            "channels": { "telegram": { "botToken": "abc", "apiBase": "http://localhost:9" } },
            "providers": { "order": ["ollama"], "timeoutSecs": 5, "ollama": { "model": "qwen3:8b" } },
            "session": { "ttlSecs": 60, "sweepIntervalSecs": 10 },
            "assistant": { "modelIntent": true }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.channels.telegram.bot_token.as_deref(), Some("abc"));
        assert_eq!(config.providers.order, vec!["ollama"]);
        assert_eq!(config.providers.timeout_secs, 5);
        assert_eq!(config.providers.ollama.model.as_deref(), Some("qwen3:8b"));
        assert_eq!(config.session.ttl_secs, 60);
        assert!(config.assistant.model_intent);
    }

    #[test]
    fn blank_config_secret_is_ignored() {
        assert_eq!(config_secret(&Some("   ".to_string())), None);
        assert_eq!(config_secret(&Some(" k ".to_string())), Some("k".to_string()));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.port, 8080);
    }
}
