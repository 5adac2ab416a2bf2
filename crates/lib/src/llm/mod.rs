//! Language-model providers and the ordered fallback chain.
//!
//! Every backend implements [`Provider`]: one prompt (plus optional system instruction) in,
//! one [`ProviderOutcome`] out. Backend-specific request/response shapes stay inside each
//! client; HTTP failures are mapped to [`ProviderError`] here so the chain never sees them raw.

mod fallback;
mod gemini;
mod ollama;
mod openai;

pub use fallback::{ask_with_fallback, Exhausted, ProviderChain, ProviderReply};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Typed failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("network error: {0}")]
    Network(String),
    /// Required key absent; no request was made.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Short stable name, used in logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::BadRequest(_) => "bad_request",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::Network(_) => "network_error",
            ProviderError::NotConfigured(_) => "not_configured",
        }
    }

    /// Timeout, network or malformed response: the provider itself failed.
    /// The rest are rejections of this particular request.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::Network(_) | ProviderError::MalformedResponse(_)
        )
    }

    /// The request URL is dropped: Gemini carries its key in the query string.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status (and its body) to a typed failure.
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let message = api_error_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                truncate(trimmed, 300)
            }
        });
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
            s if s.is_client_error() => ProviderError::BadRequest(message),
            s => ProviderError::Network(format!("{} {}", s, message)),
        }
    }
}

/// Result of one provider call: reply text or a typed failure.
pub type ProviderOutcome = Result<String, ProviderError>;

/// One interchangeable language-model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name (e.g. "gemini").
    fn name(&self) -> &str;

    /// Send one prompt with an optional system instruction. No internal retries.
    async fn ask(&self, prompt: &str, system: Option<&str>) -> ProviderOutcome;
}

/// Send a prepared request and decode the JSON body, mapping every failure to a ProviderError.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let res = request.send().await.map_err(ProviderError::from_reqwest)?;
    let status = res.status();
    let body = res.text().await.map_err(ProviderError::from_reqwest)?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

/// Non-empty reply text or MalformedResponse.
pub(crate) fn require_text(text: Option<String>, what: &str) -> ProviderOutcome {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(ProviderError::MalformedResponse(format!("{} has no text", what))),
    }
}

/// `{"error": {"message": ".."}}` (Gemini, OpenAI) or `{"error": ".."}` (Ollama).
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(|s| s.to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited(_)
        ));
        assert_eq!(
            ProviderError::from_status(StatusCode::REQUEST_TIMEOUT, ""),
            ProviderError::Timeout
        );
        assert_eq!(
            ProviderError::from_status(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"code":400,"message":"API key not valid"}}"#
            ),
            ProviderError::BadRequest("API key not valid".to_string())
        );
        assert_eq!(
            ProviderError::from_status(StatusCode::NOT_FOUND, r#"{"error":"model not found"}"#),
            ProviderError::BadRequest("model not found".to_string())
        );
        assert!(matches!(
            ProviderError::from_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            ProviderError::Network(_)
        ));
    }

    #[test]
    fn transport_failures() {
        assert!(ProviderError::Timeout.is_transport_failure());
        assert!(ProviderError::Network("x".into()).is_transport_failure());
        assert!(ProviderError::MalformedResponse("x".into()).is_transport_failure());
        assert!(!ProviderError::RateLimited("x".into()).is_transport_failure());
        assert!(!ProviderError::BadRequest("x".into()).is_transport_failure());
        assert_eq!(ProviderError::Network("x".into()).kind(), "network_error");
    }

    #[test]
    fn require_text_rejects_blank() {
        assert_eq!(require_text(Some("hi".into()), "reply"), Ok("hi".to_string()));
        assert!(matches!(
            require_text(Some("  ".into()), "reply"),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(require_text(None, "reply").is_err());
    }
}
