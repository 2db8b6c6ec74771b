//! Headless execution environment capability.
//!
//! [`ExecutionEnvironment`] is selected once at startup. [`NullEnvironment`]
//! stands in when no headless runtime is configured, so callers never branch
//! on configuration per call. [`ProcessEnvironment`] drives an external
//! driver over line-delimited JSON on stdin/stdout:
//!
//! ```text
//! -> {"op":"navigate","url":"file:///tmp/x.html"}
//! <- {"ok":true}
//! -> {"op":"evaluate","expression":"typeof setup"}
//! <- {"ok":true,"value":"function"}
//! -> {"op":"drain"}
//! <- {"ok":true,"value":{"console_errors":[],"page_errors":[]}}
//! -> {"op":"close"}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ValidationConfig;

/// Diagnostics captured from a loaded page since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageDiagnostics {
    pub console_errors: Vec<String>,
    pub page_errors: Vec<String>,
}

/// A loaded document inside the environment.
#[async_trait]
pub trait Page: Send {
    /// Evaluate a script expression and return its JSON value.
    async fn evaluate(&mut self, expression: &str) -> Result<Value>;

    /// Console and uncaught errors collected so far.
    async fn drain(&mut self) -> Result<PageDiagnostics>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Fixed at construction.
    fn available(&self) -> bool;

    /// Load the document at `path`.
    async fn open(&self, path: &Path) -> Result<Box<dyn Page>>;
}

/// Absent environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEnvironment;

#[async_trait]
impl ExecutionEnvironment for NullEnvironment {
    fn available(&self) -> bool {
        false
    }

    async fn open(&self, _path: &Path) -> Result<Box<dyn Page>> {
        Err(anyhow!("no headless execution environment configured"))
    }
}

/// Environment backed by an external driver process.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    program: Option<PathBuf>,
    args: Vec<String>,
}

impl ProcessEnvironment {
    /// Resolve `command[0]` once; an unresolvable program makes the
    /// environment permanently unavailable.
    pub fn new(command: &[String]) -> Self {
        let program = command.first().and_then(|program| resolve_program(program));
        if program.is_none() {
            warn!(
                command = ?command,
                "headless driver not found; dynamic checks will use heuristics"
            );
        }
        Self {
            program,
            args: command.iter().skip(1).cloned().collect(),
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for ProcessEnvironment {
    fn available(&self) -> bool {
        self.program.is_some()
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn open(&self, path: &Path) -> Result<Box<dyn Page>> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| anyhow!("headless driver unavailable"))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        debug!(program = %program.display(), "spawning headless driver");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn headless driver {}", program.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;

        let mut page = DriverPage {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };
        let url = file_url(path)?;
        page.call(DriverOp::Navigate { url: url.as_str() })
            .await
            .context("navigate headless driver")?;
        Ok(Box::new(page))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverOp<'a> {
    Navigate { url: &'a str },
    Evaluate { expression: &'a str },
    Drain,
    Close,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

struct DriverPage {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl DriverPage {
    async fn send(&mut self, op: &DriverOp<'_>) -> Result<()> {
        let mut line = serde_json::to_string(op).context("serialize driver op")?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("write driver op")?;
        self.stdin.flush().await.context("flush driver op")?;
        Ok(())
    }

    async fn call(&mut self, op: DriverOp<'_>) -> Result<Value> {
        self.send(&op).await?;
        let line = self
            .stdout
            .next_line()
            .await
            .context("read driver reply")?
            .ok_or_else(|| anyhow!("headless driver exited"))?;
        let reply: DriverReply =
            serde_json::from_str(&line).with_context(|| format!("parse driver reply {line}"))?;
        if !reply.ok {
            return Err(anyhow!(
                "headless driver error: {}",
                reply.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(reply.value)
    }
}

#[async_trait]
impl Page for DriverPage {
    async fn evaluate(&mut self, expression: &str) -> Result<Value> {
        self.call(DriverOp::Evaluate { expression }).await
    }

    async fn drain(&mut self) -> Result<PageDiagnostics> {
        let value = self.call(DriverOp::Drain).await?;
        serde_json::from_value(value).context("parse page diagnostics")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut page = *self;
        if let Err(err) = page.send(&DriverOp::Close).await {
            debug!(error = %err, "driver close request failed");
        }
        drop(page.stdin);
        page.child.kill().await.ok();
        Ok(())
    }
}

/// Percent-encoded `file://` URL for an absolute `path`.
pub fn file_url(path: &Path) -> Result<Url> {
    Url::from_file_path(path)
        .map_err(|()| anyhow!("artifact path is not absolute: {}", path.display()))
}

/// Locate `program` on `PATH`, or check it directly when it contains a separator.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let program = program.trim();
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

/// Select the environment once from configuration.
pub fn environment_from_config(cfg: &ValidationConfig) -> Arc<dyn ExecutionEnvironment> {
    if !cfg.dynamic || cfg.headless_command.is_empty() {
        info!("no headless environment configured");
        return Arc::new(NullEnvironment);
    }
    Arc::new(ProcessEnvironment::new(&cfg.headless_command))
}
