//! Session orchestration: architect, engineer, validate, debugger.
//!
//! Each session runs as one task that owns its [`Session`] record. Phase
//! changes go through [`Session::apply`], and every accepted transition
//! stores a snapshot in the repository before publishing exactly one phase
//! event. External calls are bounded by the phase watchdog; expiry is
//! treated like any other validation failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::core::budget::worst_case_backoff;
use crate::core::invariants::validate_session_invariants;
use crate::core::machine::PhaseEvent;
use crate::core::normalize::{NormalizeRoute, normalize};
use crate::core::session::Session;
use crate::core::types::{
    Diagnostic, Phase, SessionOutcome, Task, TaskKind, Tier, ValidationReport, ValidationTiers,
};
use crate::io::artifact_store::{ArtifactPaths, CompletionSummary, write_final, write_planning};
use crate::io::backend::backends_from_config;
use crate::io::config::GenesisConfig;
use crate::io::generation::{GenerationClient, RetryPolicy, Source};
use crate::io::progress::{ProgressHub, SessionReporter};
use crate::io::prompt::{RoleContext, RolePrompts};
use crate::io::sessions::SessionRepository;
use crate::validate::Validator;

/// Session-independent orchestration limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Repair cycles allowed before a session fails.
    pub retry_bound: u32,
    /// Deadline for each external call.
    pub phase_timeout: Duration,
    pub output_dir: PathBuf,
    /// Session records kept before the oldest finished ones are evicted.
    pub max_retained_sessions: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &GenesisConfig) -> Self {
        Self {
            retry_bound: cfg.retry_bound,
            phase_timeout: cfg.phase_timeout(),
            output_dir: cfg.output_dir.clone(),
            max_retained_sessions: cfg.max_retained_sessions,
        }
    }
}

/// Drives sessions from request to COMPLETE or FAILED.
///
/// Cheap to clone; clones share the client, validator, repository and hub.
#[derive(Clone)]
pub struct Orchestrator {
    client: GenerationClient,
    validator: Arc<Validator>,
    sessions: Arc<dyn SessionRepository>,
    hub: ProgressHub,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        client: GenerationClient,
        validator: Validator,
        sessions: Arc<dyn SessionRepository>,
        hub: ProgressHub,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            client,
            validator: Arc::new(validator),
            sessions,
            hub,
            settings,
        }
    }

    /// Wire the production backends and environment from `cfg`.
    pub fn from_config(
        cfg: &GenesisConfig,
        sessions: Arc<dyn SessionRepository>,
        hub: ProgressHub,
    ) -> Result<Self> {
        cfg.validate()?;
        let generation = &cfg.generation;
        let worst_case = worst_case_backoff(
            generation.max_attempts,
            generation.initial_backoff(),
            generation.max_backoff(),
        );
        if worst_case >= cfg.phase_timeout() {
            warn!(
                backoff_secs = worst_case.as_secs(),
                phase_timeout_secs = cfg.phase_timeout_secs,
                "retry backoff for one backend can outlast the phase watchdog"
            );
        }
        let backends = backends_from_config(generation)?;
        let prompts = RolePrompts::new(cfg.artifact.clone()).context("load role prompts")?;
        let client = GenerationClient::new(
            backends,
            prompts,
            RetryPolicy::from_config(generation),
            generation.max_tokens,
        );
        Ok(Self::new(
            client,
            Validator::from_config(cfg),
            sessions,
            hub,
            PipelineSettings::from_config(cfg),
        ))
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRepository> {
        &self.sessions
    }

    /// Register a new session in INITIALIZING and open its progress log.
    pub fn create_session(&self, request: &str) -> Result<Session> {
        let request = request.trim();
        if request.is_empty() {
            bail!("request must not be empty");
        }
        let session = Session::new(
            Uuid::new_v4().to_string(),
            request,
            self.settings.retry_bound,
        );
        self.hub.open(&session.id);
        self.sessions.put(session.clone());
        info!(session_id = %session.id, "session created");
        self.evict_finished();
        Ok(session)
    }

    /// Forget the oldest terminal sessions, and their progress logs, while
    /// the repository holds more than `max_retained_sessions`. Running
    /// sessions are never evicted.
    fn evict_finished(&self) {
        let retained = self.sessions.list();
        let excess = retained
            .len()
            .saturating_sub(self.settings.max_retained_sessions);
        for session in retained
            .iter()
            .filter(|session| session.terminal)
            .take(excess)
        {
            self.sessions.delete(&session.id);
            self.hub.remove(&session.id);
            debug!(session_id = %session.id, "evicted finished session");
        }
    }

    /// Register a session and run it in the background. Returns its id.
    pub fn submit(&self, request: &str) -> Result<String> {
        let session = self.create_session(request)?;
        let id = session.id.clone();
        let this = self.clone();
        tokio::spawn(async move {
            this.run_session(session).await;
        });
        Ok(id)
    }

    /// Run `session` to a terminal phase. Never panics on pipeline defects;
    /// those end the session as FAILED.
    pub async fn run_session(&self, session: Session) -> SessionOutcome {
        let span = info_span!("session", session_id = %session.id);
        let mut run = SessionRun {
            reporter: self.hub.reporter(&session.id),
            paths: ArtifactPaths::new(&self.settings.output_dir, &session.request, &session.id),
            orch: self,
            session,
            pending: None,
        };
        async move {
            if let Err(err) = run.drive().await {
                run.abort(&err);
            }
            run.finish()
        }
        .instrument(span)
        .await
    }
}

/// Result of one watchdog-bounded role call.
enum RoleOutput {
    Generated(String),
    TimedOut,
}

struct SessionRun<'a> {
    orch: &'a Orchestrator,
    session: Session,
    reporter: SessionReporter,
    paths: ArtifactPaths,
    /// Diagnostic to merge into the next validation report.
    pending: Option<Diagnostic>,
}

impl SessionRun<'_> {
    async fn drive(&mut self) -> Result<()> {
        self.transition(PhaseEvent::Start)?;
        self.architect().await?;
        self.transition(PhaseEvent::PlanReady)?;
        self.engineer().await?;
        self.transition(PhaseEvent::CodeReady)?;

        loop {
            let report = self.validate().await?;
            if report.success() {
                self.complete().await?;
                self.transition(PhaseEvent::ValidationPassed)?;
                return Ok(());
            }
            self.reporter.error(
                Phase::Validate.progress(),
                format!(
                    "validation failed with {} error(s): {}",
                    report.errors().len(),
                    report.error_messages().join("; ")
                ),
            );
            match self.transition(PhaseEvent::ValidationFailed)? {
                Phase::Debugger => {
                    self.debugger(&report).await?;
                    self.transition(PhaseEvent::Repaired)?;
                }
                _ => return Ok(()),
            }
        }
    }

    async fn architect(&mut self) -> Result<()> {
        let request = self.session.request.clone();
        let design = match self
            .call(TaskKind::Design, request.clone(), RoleContext {
                request: &request,
                ..RoleContext::default()
            })
            .await?
        {
            RoleOutput::Generated(text) => text,
            RoleOutput::TimedOut => self.orch.client.placeholder(TaskKind::Design, &request)?,
        };
        let plan = match self
            .call(TaskKind::Plan, request.clone(), RoleContext {
                request: &request,
                design: Some(&design),
                ..RoleContext::default()
            })
            .await?
        {
            RoleOutput::Generated(text) => text,
            RoleOutput::TimedOut => self.orch.client.placeholder(TaskKind::Plan, &request)?,
        };

        write_planning(&self.paths, &design, &plan)
            .await
            .context("persist planning documents")?;
        self.reporter.artifact(
            0.3,
            format!("planning documents saved to {}", self.paths.dir.display()),
        );
        self.session.record_design(design, plan)?;
        Ok(())
    }

    async fn engineer(&mut self) -> Result<()> {
        let request = self.session.request.clone();
        let design = self.session.design.clone().unwrap_or_default();
        let plan = self.session.plan.clone().unwrap_or_default();
        let output = self
            .call(TaskKind::Implement, request.clone(), RoleContext {
                request: &request,
                design: Some(&design),
                plan: Some(&plan),
                ..RoleContext::default()
            })
            .await?;
        self.accept_code(output, 0.5)
    }

    async fn debugger(&mut self, report: &ValidationReport) -> Result<()> {
        let request = self.session.request.clone();
        let artifact = self.session.code.clone().unwrap_or_default();
        let diagnostics = report.error_messages();
        self.reporter.agent(
            Phase::Debugger.progress(),
            format!(
                "debugger repairing {} diagnostic(s), cycle {} of {}",
                diagnostics.len(),
                self.session.retries + 1,
                self.session.retry_bound
            ),
        );
        let output = self
            .call(TaskKind::Repair, diagnostics.join("\n"), RoleContext {
                request: &request,
                artifact: Some(&artifact),
                diagnostics: &diagnostics,
                ..RoleContext::default()
            })
            .await?;
        self.accept_code(output, 0.85)
    }

    /// Normalize generated code and store it, or keep the prior artifact on
    /// watchdog expiry.
    fn accept_code(&mut self, output: RoleOutput, progress: f64) -> Result<()> {
        match output {
            RoleOutput::Generated(text) => {
                let normalized = normalize(&text, self.orch.validator.rules());
                if normalized.route == NormalizeRoute::Fallback {
                    warn!("generated code was unparsable; substituted fallback artifact");
                    self.reporter.log(
                        progress,
                        "generated code was unparsable; substituted the fallback artifact",
                    );
                } else {
                    debug!(
                        route = ?normalized.route,
                        chars = normalized.code.len(),
                        "code normalized"
                    );
                }
                self.reporter.artifact(
                    progress,
                    format!("artifact ready ({} characters)", normalized.code.len()),
                );
                self.session.record_code(normalized.code)?;
            }
            RoleOutput::TimedOut => {
                if self.session.code.is_none() {
                    self.session.record_code(String::new())?;
                }
            }
        }
        Ok(())
    }

    async fn validate(&mut self) -> Result<ValidationReport> {
        let code = self.session.code.clone().unwrap_or_default();
        let mut report = self.orch.validator.validate(&code).await;
        if let Some(diagnostic) = self.pending.take() {
            report = report.with_error(diagnostic);
        }
        for warning in report.warnings() {
            self.reporter.log(0.65, format!("warning: {warning}"));
        }
        self.session.record_report(report.clone())?;
        Ok(report)
    }

    async fn complete(&mut self) -> Result<()> {
        let code = self.session.code.clone().unwrap_or_default();
        let rules = self.orch.validator.rules();
        let summary = CompletionSummary {
            request: &self.session.request,
            session_id: &self.session.id,
            debug_cycles: self.session.debug_cycles(),
            library: rules
                .library_markers
                .first()
                .map_or("runtime library", String::as_str),
        };
        let location = write_final(&self.paths, &code, &summary)
            .await
            .context("persist final artifact")?;
        self.reporter
            .artifact(0.95, format!("artifact saved to {}", location.display()));
        self.reporter.success(0.95, "artifact passed validation");
        self.session.record_location(location)?;
        Ok(())
    }

    /// One role call bounded by the phase watchdog; the attempt is recorded
    /// as a task on the session.
    async fn call(
        &mut self,
        kind: TaskKind,
        input: String,
        ctx: RoleContext<'_>,
    ) -> Result<RoleOutput> {
        let orch = self.orch;
        let client = &orch.client;
        let mut task = Task::new(kind, input, client.max_attempts());
        task.start();
        self.reporter.agent(
            self.session.phase.progress(),
            format!("{} working on {}", kind.role(), kind.as_str()),
        );

        let timeout = orch.settings.phase_timeout;
        let output = match tokio::time::timeout(timeout, client.generate(kind, &ctx)).await {
            Ok(generated) => {
                let generation = generated.with_context(|| format!("{} call", kind.as_str()))?;
                let from = match &generation.source {
                    Source::Backend { id } => format!("backend {id}"),
                    Source::Placeholder => "placeholder".to_string(),
                };
                self.reporter.log(
                    self.session.phase.progress(),
                    format!(
                        "{} {} ready from {from} after {} call(s)",
                        kind.role(),
                        kind.as_str(),
                        generation.attempts
                    ),
                );
                task.succeed(generation.text.clone(), generation.attempts);
                RoleOutput::Generated(generation.text)
            }
            Err(_) => {
                let message = format!(
                    "{} {} timed out after {}s",
                    kind.role(),
                    kind.as_str(),
                    timeout.as_secs()
                );
                warn!(kind = kind.as_str(), "{message}");
                self.reporter
                    .error(self.session.phase.progress(), message.clone());
                task.fail(message.clone());
                if kind.produces_artifact() {
                    self.pending = Some(Diagnostic::new(Tier::Watchdog, message));
                }
                RoleOutput::TimedOut
            }
        };
        self.session.record_task(task)?;
        Ok(output)
    }

    /// Apply `event`, store a snapshot, then publish one phase event.
    ///
    /// The snapshot lands first so an observer reacting to a terminal event
    /// already finds the terminal record.
    fn transition(&mut self, event: PhaseEvent) -> Result<Phase> {
        let from = self.session.phase;
        let phase = self.session.apply(event)?;
        info!(from = %from, to = %phase, "phase transition");
        for violation in validate_session_invariants(&self.session) {
            error!(%violation, "session invariant violated");
        }
        self.orch.sessions.put(self.session.clone());
        self.reporter.phase(phase, self.phase_message(phase));
        Ok(phase)
    }

    fn phase_message(&self, phase: Phase) -> String {
        match phase {
            Phase::Initializing => "session initializing".to_string(),
            Phase::Architect => "architect designing the game".to_string(),
            Phase::Engineer => "engineer implementing the plan".to_string(),
            Phase::Validate => "validating artifact".to_string(),
            Phase::Debugger => format!(
                "debugger engaged ({} of {} repair cycles used)",
                self.session.retries, self.session.retry_bound
            ),
            Phase::Complete | Phase::Failed => self
                .session
                .outcome()
                .map(|outcome| outcome.to_string())
                .unwrap_or_default(),
        }
    }

    /// End a session after a pipeline defect.
    fn abort(&mut self, err: &anyhow::Error) {
        let message = format!("pipeline error: {err:#}");
        error!(error = %message, "aborting session");
        if self.session.terminal {
            return;
        }
        self.reporter
            .error(self.session.phase.progress(), message.clone());
        let report = self
            .session
            .last_report
            .clone()
            .unwrap_or_else(|| {
                ValidationReport::new(Vec::new(), Vec::new(), ValidationTiers::default())
            })
            .with_error(Diagnostic::new(Tier::Internal, message));
        if let Err(err) = self.session.record_report(report) {
            error!(error = %err, "record abort report");
        }
        if let Err(err) = self.transition(PhaseEvent::Abort) {
            error!(error = %err, "abort transition rejected");
        }
    }

    fn finish(self) -> SessionOutcome {
        let outcome = self.session.outcome().unwrap_or_else(|| SessionOutcome::Failed {
            debug_cycles: self.session.retries,
            diagnostics: vec![
                "session ended without reaching a terminal phase".to_string(),
            ],
        });
        // Terminal snapshots are stored by `transition`; the record may be
        // deleted by now.
        if !self.session.terminal {
            self.orch.sessions.put(self.session);
        }
        info!(%outcome, "session finished");
        outcome
    }
}
