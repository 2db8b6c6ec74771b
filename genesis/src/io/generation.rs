//! Generation client: backend fallback hierarchy with bounded retries.
//!
//! Backends are tried in order. Each gets up to `max_attempts` calls with
//! exponential backoff between transient failures; a fatal error moves on to
//! the next backend at once. When no backend can serve the call, a
//! deterministic placeholder is returned so the pipeline never stalls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::backoff_delay;
use crate::core::types::TaskKind;
use crate::io::backend::{Backend, BackendError, CompletionRequest};
use crate::io::config::GenerationConfig;
use crate::io::prompt::{RoleContext, RolePrompts};

/// Where generated text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Backend { id: String },
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub source: Source,
    /// Backend calls made across the whole hierarchy.
    pub attempts: u32,
}

/// Outcome of driving one request through the backend hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryResult {
    Ok {
        text: String,
        backend: String,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_error: Option<BackendError>,
    },
}

/// Retry limits applied per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &GenerationConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_backoff: cfg.initial_backoff(),
            max_backoff: cfg.max_backoff(),
        }
    }
}

/// Send `request` through `backends` in order.
#[instrument(skip_all, fields(kind = request.kind.as_str(), backends = backends.len()))]
pub async fn drive(
    backends: &[Arc<dyn Backend>],
    request: &CompletionRequest,
    policy: RetryPolicy,
) -> RetryResult {
    let mut attempts = 0u32;
    let mut last_error = None;

    'backends: for backend in backends {
        for attempt in 1..=policy.max_attempts {
            attempts += 1;
            match backend.complete(request).await {
                Ok(text) => {
                    debug!(backend = backend.id(), attempt, "backend call succeeded");
                    return RetryResult::Ok {
                        text,
                        backend: backend.id().to_string(),
                        attempts,
                    };
                }
                Err(BackendError::Unavailable(reason)) => {
                    warn!(
                        backend = backend.id(),
                        %reason,
                        "backend unavailable; using placeholder"
                    );
                    return RetryResult::Exhausted {
                        attempts,
                        last_error: Some(BackendError::Unavailable(reason)),
                    };
                }
                Err(BackendError::Fatal(reason)) => {
                    warn!(
                        backend = backend.id(),
                        attempt,
                        %reason,
                        "fatal backend error; trying next backend"
                    );
                    last_error = Some(BackendError::Fatal(reason));
                    continue 'backends;
                }
                Err(BackendError::Transient(reason)) => {
                    last_error = Some(BackendError::Transient(reason.clone()));
                    if attempt == policy.max_attempts {
                        warn!(
                            backend = backend.id(),
                            attempt,
                            %reason,
                            "retries exhausted; trying next backend"
                        );
                        continue 'backends;
                    }
                    let delay = backoff_delay(attempt, policy.initial_backoff, policy.max_backoff);
                    info!(
                        backend = backend.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "transient backend error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    RetryResult::Exhausted {
        attempts,
        last_error,
    }
}

/// Role-aware client shared by every session.
///
/// Holds no mutable state, so clones can be used from concurrent sessions.
#[derive(Clone)]
pub struct GenerationClient {
    backends: Arc<[Arc<dyn Backend>]>,
    prompts: Arc<RolePrompts>,
    policy: RetryPolicy,
    max_tokens: u32,
}

impl GenerationClient {
    pub fn new(
        backends: Vec<Arc<dyn Backend>>,
        prompts: RolePrompts,
        policy: RetryPolicy,
        max_tokens: u32,
    ) -> Self {
        Self {
            backends: backends.into(),
            prompts: Arc::new(prompts),
            policy,
            max_tokens,
        }
    }

    /// Upper bound on backend calls for one role call.
    pub fn max_attempts(&self) -> u32 {
        self.policy
            .max_attempts
            .saturating_mul(self.backends.len() as u32)
    }

    /// Deterministic stand-in for `kind`, as used when no backend serves.
    pub fn placeholder(&self, kind: TaskKind, request: &str) -> Result<String> {
        self.prompts.placeholder(kind, request)
    }

    /// Produce text for `kind`. Backend failures never surface here; only a
    /// template rendering defect does.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn generate(&self, kind: TaskKind, ctx: &RoleContext<'_>) -> Result<Generation> {
        let rendered = self.prompts.render(kind, ctx)?;
        let request = CompletionRequest {
            kind,
            system: rendered.system,
            prompt: rendered.user,
            max_tokens: self.max_tokens,
        };

        match drive(&self.backends, &request, self.policy).await {
            RetryResult::Ok {
                text,
                backend,
                attempts,
            } => Ok(Generation {
                text,
                source: Source::Backend { id: backend },
                attempts,
            }),
            RetryResult::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(
                    attempts,
                    last_error = last_error.as_ref().map(ToString::to_string),
                    "no backend served the request; returning placeholder"
                );
                Ok(Generation {
                    text: self.placeholder(kind, ctx.request)?,
                    source: Source::Placeholder,
                    attempts,
                })
            }
        }
    }
}
