//! Test-only doubles for the generation backend and the headless environment.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::fallback::FALLBACK_ARTIFACT;
use crate::core::types::TaskKind;
use crate::io::backend::{Backend, BackendError, CompletionRequest};
use crate::io::environment::{ExecutionEnvironment, Page, PageDiagnostics};

type Reply = Result<String, BackendError>;

/// Backend that replays scripted replies.
///
/// Replies queued for a specific [`TaskKind`] win over the shared queue; when
/// both are empty the default reply is used, and without one the call fails
/// fatally.
pub struct ScriptedBackend {
    id: String,
    queue: Mutex<VecDeque<Reply>>,
    by_kind: Mutex<HashMap<TaskKind, VecDeque<Reply>>>,
    default: Mutex<Option<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            queue: Mutex::new(VecDeque::new()),
            by_kind: Mutex::new(HashMap::new()),
            default: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_ok(&self, text: &str) {
        lock(&self.queue).push_back(Ok(text.to_string()));
    }

    pub fn push_err(&self, err: BackendError) {
        lock(&self.queue).push_back(Err(err));
    }

    /// Queue a reply used only for calls of `kind`.
    pub fn push_for(&self, kind: TaskKind, reply: Reply) {
        lock(&self.by_kind)
            .entry(kind)
            .or_default()
            .push_back(reply);
    }

    pub fn set_default_ok(&self, text: &str) {
        *lock(&self.default) = Some(Ok(text.to_string()));
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn calls_for(&self, kind: TaskKind) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.kind == kind)
            .count()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        lock(&self.requests).push(request.clone());
        if let Some(reply) = lock(&self.by_kind)
            .get_mut(&request.kind)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(reply) = lock(&self.queue).pop_front() {
            return reply;
        }
        lock(&self.default)
            .clone()
            .unwrap_or_else(|| Err(BackendError::Fatal("script exhausted".to_string())))
    }
}

/// Headless environment whose pages return scripted diagnostics and values.
pub struct ScriptedEnvironment {
    available: AtomicBool,
    diagnostics: PageDiagnostics,
    values: HashMap<String, Value>,
    default_value: Value,
    hang: Option<Duration>,
    fail_open: bool,
    opened: AtomicUsize,
}

impl ScriptedEnvironment {
    /// Every assertion evaluates to `true` and no errors are reported.
    pub fn passing() -> Self {
        Self {
            available: AtomicBool::new(true),
            diagnostics: PageDiagnostics::default(),
            values: HashMap::new(),
            default_value: Value::Bool(true),
            hang: None,
            fail_open: false,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn with_console_error(mut self, message: &str) -> Self {
        self.diagnostics.console_errors.push(message.to_string());
        self
    }

    pub fn with_page_error(mut self, message: &str) -> Self {
        self.diagnostics.page_errors.push(message.to_string());
        self
    }

    pub fn with_value(mut self, expression: &str, value: Value) -> Self {
        self.values.insert(expression.to_string(), value);
        self
    }

    /// Opening a page takes `delay` before it resolves.
    pub fn hanging(mut self, delay: Duration) -> Self {
        self.hang = Some(delay);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEnvironment for ScriptedEnvironment {
    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn Page>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.hang {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open {
            return Err(anyhow!("driver crashed while loading {}", path.display()));
        }
        Ok(Box::new(ScriptedPage {
            diagnostics: self.diagnostics.clone(),
            values: self.values.clone(),
            default_value: self.default_value.clone(),
        }))
    }
}

struct ScriptedPage {
    diagnostics: PageDiagnostics,
    values: HashMap<String, Value>,
    default_value: Value,
}

#[async_trait]
impl Page for ScriptedPage {
    async fn evaluate(&mut self, expression: &str) -> Result<Value> {
        Ok(self
            .values
            .get(expression)
            .cloned()
            .unwrap_or_else(|| self.default_value.clone()))
    }

    async fn drain(&mut self) -> Result<PageDiagnostics> {
        Ok(std::mem::take(&mut self.diagnostics))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// An artifact that passes every static rule.
pub fn valid_artifact() -> String {
    FALLBACK_ARTIFACT.to_string()
}

/// [`valid_artifact`] with the `function name(` signature renamed away.
pub fn artifact_without_entry_point(name: &str) -> String {
    FALLBACK_ARTIFACT.replace(
        &format!("function {name}()"),
        &format!("function {name}Loop()"),
    )
}

/// Surround `artifact` with the chatter a model typically adds.
pub fn wrapped_in_prose(artifact: &str) -> String {
    format!(
        "Here is your game! It uses p5.js.\n\n```html\n{}\n```\n\n\
         Enjoy, and tell me if you want tweaks.",
        artifact.trim()
    )
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
