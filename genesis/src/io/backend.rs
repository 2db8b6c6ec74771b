//! Generation backends.
//!
//! The [`Backend`] trait decouples the retry driver from the concrete text
//! generation service. [`AnthropicBackend`] talks to the Messages API; tests
//! use scripted backends that return predetermined outputs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::TaskKind;
use crate::io::config::GenerationConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Failure taxonomy for a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The service cannot be used at all (no credentials, no client).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Worth retrying on the same backend after a delay.
    #[error("transient backend error: {0}")]
    Transient(String),
    /// Retrying this backend will not help.
    #[error("fatal backend error: {0}")]
    Fatal(String),
}

/// One role call, fully rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub kind: TaskKind,
    /// Role instructions.
    pub system: String,
    /// Role context (request, design, plan, artifact, diagnostics).
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier recorded on generations and in logs.
    fn id(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [ApiMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Messages API client bound to one model.
pub struct AnthropicBackend {
    model: String,
    base_url: String,
    api_key: Option<String>,
    http: Option<reqwest::Client>,
}

impl AnthropicBackend {
    /// Build a backend for `model`.
    ///
    /// A missing key or an HTTP client that fails to build leaves the backend
    /// in a state where every call reports [`BackendError::Unavailable`].
    pub fn new(model: &str, base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let http = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "failed to build http client");
                None
            }
        };
        Self {
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            http,
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(backend = %self.model, kind = request.kind.as_str()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::Unavailable(
                "no API key configured".to_string(),
            ));
        };
        let Some(http) = self.http.as_ref() else {
            return Err(BackendError::Unavailable(
                "http client unavailable".to_string(),
            ));
        };

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: [ApiMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let resp = http
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|err| BackendError::Fatal(format!("malformed response body: {err}")))?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<String>();
        if text.trim().is_empty() {
            return Err(BackendError::Fatal(
                "response contained no text".to_string(),
            ));
        }
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

fn classify_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BackendError::Transient(err.to_string())
    } else {
        BackendError::Fatal(err.to_string())
    }
}

/// Map an HTTP status to the backend error taxonomy.
pub fn classify_status(status: u16, body: &str) -> BackendError {
    let detail = format!("HTTP {status}: {}", body.trim());
    match status {
        408 | 409 | 429 | 500..=599 => BackendError::Transient(detail),
        _ => BackendError::Fatal(detail),
    }
}

/// Build the configured backend hierarchy, in fallback order.
pub fn backends_from_config(cfg: &GenerationConfig) -> Result<Vec<Arc<dyn Backend>>> {
    let api_key = std::env::var(&cfg.api_key_env).ok();
    if api_key.is_none() {
        warn!(
            env = cfg.api_key_env.as_str(),
            "API key not set; generation will use placeholder output"
        );
    }
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let backends = cfg
        .backends
        .iter()
        .map(|model| {
            Arc::new(AnthropicBackend::new(
                model,
                &cfg.base_url,
                api_key.clone(),
                timeout,
            )) as Arc<dyn Backend>
        })
        .collect::<Vec<_>>();
    ensure!(!backends.is_empty(), "generation.backends is empty");
    Ok(backends)
}
