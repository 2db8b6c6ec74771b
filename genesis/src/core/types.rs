//! Shared deterministic types for the generation pipeline.
//!
//! These types define stable contracts between the orchestrator, the
//! validators and the observer surface. They carry no I/O and serialize to a
//! stable JSON shape.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named stage of a session's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Architect,
    Engineer,
    Validate,
    Debugger,
    Complete,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Architect => "architect",
            Phase::Engineer => "engineer",
            Phase::Validate => "validate",
            Phase::Debugger => "debugger",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Coarse progress fraction reported when the phase is entered.
    pub fn progress(self) -> f64 {
        match self {
            Phase::Initializing => 0.0,
            Phase::Architect => 0.1,
            Phase::Engineer => 0.4,
            Phase::Validate => 0.6,
            Phase::Debugger => 0.75,
            Phase::Complete | Phase::Failed => 1.0,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specialized role that talks to the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Architect,
    Engineer,
    Debugger,
}

impl Role {
    pub fn id(self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Engineer => "engineer",
            Role::Debugger => "debugger",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// What a role is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Design,
    Plan,
    Implement,
    Repair,
}

impl TaskKind {
    pub fn role(self) -> Role {
        match self {
            TaskKind::Design | TaskKind::Plan => Role::Architect,
            TaskKind::Implement => Role::Engineer,
            TaskKind::Repair => Role::Debugger,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Design => "design",
            TaskKind::Plan => "plan",
            TaskKind::Implement => "implement",
            TaskKind::Repair => "repair",
        }
    }

    /// True when the output is an artifact rather than prose.
    pub fn produces_artifact(self) -> bool {
        matches!(self, TaskKind::Implement | TaskKind::Repair)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

/// One unit of role work. Short-lived, one per orchestration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub role: Role,
    pub kind: TaskKind,
    pub input: String,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Backend calls spent on this task.
    pub attempts: u32,
    /// Upper bound on backend calls across the whole fallback hierarchy.
    pub max_attempts: u32,
}

impl Task {
    pub fn new(kind: TaskKind, input: String, max_attempts: u32) -> Self {
        Self {
            role: kind.role(),
            kind,
            input,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    pub fn succeed(&mut self, output: String, attempts: u32) {
        self.status = TaskStatus::Success;
        self.output = Some(output);
        self.attempts = attempts.min(self.max_attempts);
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Error;
        self.error = Some(error);
    }
}

/// Validation tier that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Static,
    Dynamic,
    /// An external call exceeded its per-phase deadline.
    Watchdog,
    /// The pipeline itself failed (prompt rendering, persistence).
    Internal,
}

/// A named cause attached to a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub tier: Tier,
    pub message: String,
}

impl Diagnostic {
    pub fn new(tier: Tier, message: impl Into<String>) -> Self {
        Self {
            tier,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Which validation tiers contributed to a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTiers {
    pub static_ran: bool,
    pub dynamic_ran: bool,
    /// The dynamic tier ran inside a headless execution environment
    /// rather than degrading to script heuristics.
    pub browser: bool,
}

/// Immutable result of one validation pass.
///
/// `success` is derived from the error list at construction, so a failed
/// report always carries at least one error and a passing one carries none.
/// Deserialization recomputes `success` the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredReport")]
pub struct ValidationReport {
    success: bool,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
    tiers: ValidationTiers,
}

impl ValidationReport {
    pub fn new(errors: Vec<Diagnostic>, warnings: Vec<Diagnostic>, tiers: ValidationTiers) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
            warnings,
            tiers,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn tiers(&self) -> ValidationTiers {
        self.tiers
    }

    /// Return a new report with `diagnostic` appended to the error list.
    pub fn with_error(self, diagnostic: Diagnostic) -> Self {
        let mut errors = self.errors;
        errors.push(diagnostic);
        Self::new(errors, self.warnings, self.tiers)
    }

    /// Error messages in report order.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|d| d.message.clone()).collect()
    }
}

/// Serialized shape of a [`ValidationReport`]; a stored `success` flag is
/// ignored.
#[derive(Deserialize)]
struct StoredReport {
    #[serde(default)]
    errors: Vec<Diagnostic>,
    #[serde(default)]
    warnings: Vec<Diagnostic>,
    #[serde(default)]
    tiers: ValidationTiers,
}

impl From<StoredReport> for ValidationReport {
    fn from(stored: StoredReport) -> Self {
        Self::new(stored.errors, stored.warnings, stored.tiers)
    }
}

/// Category of a progress event shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressCategory {
    Phase,
    Log,
    Success,
    Error,
    AgentActivity,
    ArtifactCreated,
}

/// Append-only progress record for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    /// Position in the session log, starting at 0.
    pub seq: u64,
    pub category: ProgressCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Set on the event that records the session's terminal transition.
    pub terminal: bool,
}

/// The two user-visible outcomes of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Complete {
        location: PathBuf,
        debug_cycles: u32,
    },
    Failed {
        debug_cycles: u32,
        diagnostics: Vec<String>,
    },
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Complete {
                location,
                debug_cycles,
            } => write!(
                f,
                "session COMPLETE with artifact at {} after {} repair cycles",
                location.display(),
                debug_cycles
            ),
            SessionOutcome::Failed {
                debug_cycles,
                diagnostics,
            } => write!(
                f,
                "session FAILED after {} repair cycles with diagnostics: {}",
                debug_cycles,
                diagnostics.join("; ")
            ),
        }
    }
}
