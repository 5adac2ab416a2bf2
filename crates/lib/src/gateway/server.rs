//! Gateway HTTP server (single port).

use crate::channels::{Channel, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::intent::IntentClassifier;
use crate::llm::ProviderChain;
use crate::router::MessageRouter;
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const LIVENESS_TEXT: &str = "hesab bot is running";
const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";
const TEST_LLM_PROMPT: &str = "Reply with the single word: pong";

/// Shared state for the gateway (config, router, sessions, providers).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub router: Arc<MessageRouter>,
    pub sessions: Arc<SessionStore>,
    pub providers: ProviderChain,
    /// When Some, webhook POSTs must carry this value in the secret header.
    pub webhook_secret: Option<String>,
}

impl GatewayState {
    /// Wire sessions, providers, classifier and the Telegram channel from config.
    pub fn from_config(config: Config) -> Self {
        let telegram_token = config::resolve_telegram_token(&config);
        if telegram_token.is_none() {
            log::warn!("telegram bot token not configured; replies and file downloads will fail");
        }
        let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
            telegram_token,
            config.channels.telegram.api_base.clone(),
        ));
        let providers = ProviderChain::from_config(&config);
        if providers.is_empty() {
            log::warn!("no known providers in providers.order; general questions cannot be answered");
        }
        Self::with_channel(config, providers, channel)
    }

    /// Like [`from_config`](Self::from_config) with an explicit provider chain and channel.
    pub fn with_channel(config: Config, providers: ProviderChain, channel: Arc<dyn Channel>) -> Self {
        let sessions = Arc::new(SessionStore::with_ttl(config.session.ttl()));
        let classifier = if config.assistant.model_intent {
            IntentClassifier::with_model(providers.clone())
        } else {
            IntentClassifier::rules_only()
        };
        let router = MessageRouter::new(sessions.clone(), classifier, providers.clone(), channel)
            .with_system_prompt(config.assistant.system_prompt.clone());
        let webhook_secret = config::resolve_webhook_secret(&config);
        Self {
            config: Arc::new(config),
            router: Arc::new(router),
            sessions,
            providers,
            webhook_secret,
        }
    }
}

/// Routes: liveness and webhook on `/`, plus diagnostics.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(liveness).post(telegram_webhook))
        .route("/health", get(health_http))
        .route("/config-check", get(config_check))
        .route("/test-llm", get(test_llm))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let sweep_every = config.session.sweep_interval();
    let state = GatewayState::from_config(config);
    log::info!(
        "provider chain: [{}], session ttl {}s",
        state.providers.names().join(", "),
        state.sessions.ttl().as_secs()
    );

    let sweeper = spawn_sweeper(state.sessions.clone(), sweep_every);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    sweeper.abort();
    log::info!("gateway stopped");
    Ok(())
}

/// Evict idle sessions every `every`. The first sweep runs one interval after start.
fn spawn_sweeper(sessions: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sessions.sweep().await;
            if removed > 0 {
                log::info!("sweeper: evicted {} session(s)", removed);
            }
        }
    })
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET / returns a static liveness string.
async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// POST / receives a Telegram update, checks the optional secret, and handles the message.
/// The router runs in its own task so a dropped connection cannot cancel it mid-way.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(ref expected) = state.webhook_secret {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return (StatusCode::FORBIDDEN, "forbidden");
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::debug!("webhook: malformed update: {}", e);
            return (StatusCode::BAD_REQUEST, "malformed update");
        }
    };
    let Some(inbound) = update.into_inbound() else {
        return (StatusCode::BAD_REQUEST, "no message in update");
    };

    let router = state.router.clone();
    let conversation = inbound.conversation_id.clone();
    match tokio::spawn(async move { router.dispatch(inbound).await }).await {
        Ok(reply) => {
            log::debug!("webhook: replied to {} ({:?})", conversation, reply.kind);
            (StatusCode::OK, "ok")
        }
        Err(e) => {
            log::error!("webhook: handling message for {} failed: {}", conversation, e);
            state.router.notify_internal_error(&conversation).await;
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /health returns runtime status JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await,
    }))
}

/// GET /config-check reports which secrets are present, never their values.
async fn config_check(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "telegramBotToken": config::resolve_telegram_token(config).is_some(),
        "webhookSecret": state.webhook_secret.is_some(),
        "geminiApiKey": config::resolve_gemini_key(config).is_some(),
        "openaiApiKey": config::resolve_openai_key(config).is_some(),
        "providerOrder": state.providers.names(),
    }))
}

/// GET /test-llm sends a fixed prompt through the provider chain.
async fn test_llm(State(state): State<GatewayState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.providers.ask(TEST_LLM_PROMPT, None).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "provider": reply.provider,
                "reply": reply.text,
            })),
        ),
        Err(exhausted) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "ok": false,
                "provider": exhausted.provider,
                "error": exhausted.last.kind(),
                "message": exhausted.last.to_string(),
                "tried": exhausted.tried,
            })),
        ),
    }
}
