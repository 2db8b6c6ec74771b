//! Per-request session record.
//!
//! A session is mutated only by the orchestrator task that owns it. Every
//! mutation goes through a guard that rejects changes once the session has
//! reached a terminal phase.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::machine::{PhaseEvent, TransitionError, advance};
use crate::core::types::{Phase, SessionOutcome, Task, ValidationReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub request: String,
    pub phase: Phase,
    /// Repair cycles spent so far.
    pub retries: u32,
    pub retry_bound: u32,
    pub design: Option<String>,
    pub plan: Option<String>,
    pub code: Option<String>,
    pub last_report: Option<ValidationReport>,
    pub tasks: Vec<Task>,
    pub terminal: bool,
    pub artifact_location: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, request: impl Into<String>, retry_bound: u32) -> Self {
        Self {
            id: id.into(),
            request: request.into(),
            phase: Phase::Initializing,
            retries: 0,
            retry_bound,
            design: None,
            plan: None,
            code: None,
            last_report: None,
            tasks: Vec::new(),
            terminal: false,
            artifact_location: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Number of completed debugger -> validate iterations.
    pub fn debug_cycles(&self) -> u32 {
        self.retries
    }

    /// Apply `event` and return the phase that was entered.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<Phase, TransitionError> {
        self.ensure_mutable()?;
        let next = advance(self.phase, event, self.retries, self.retry_bound)?;
        if event == PhaseEvent::Repaired {
            self.retries += 1;
        }
        self.phase = next;
        if next.is_terminal() {
            self.terminal = true;
            self.finished_at = Some(Utc::now());
        }
        Ok(next)
    }

    pub fn record_design(&mut self, design: String, plan: String) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.design = Some(design);
        self.plan = Some(plan);
        Ok(())
    }

    pub fn record_code(&mut self, code: String) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.code = Some(code);
        Ok(())
    }

    pub fn record_report(&mut self, report: ValidationReport) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.last_report = Some(report);
        Ok(())
    }

    pub fn record_task(&mut self, task: Task) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.tasks.push(task);
        Ok(())
    }

    pub fn record_location(&mut self, location: PathBuf) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.artifact_location = Some(location);
        Ok(())
    }

    /// Terminal outcome, once the session has reached COMPLETE or FAILED.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self.phase {
            Phase::Complete => Some(SessionOutcome::Complete {
                location: self.artifact_location.clone().unwrap_or_default(),
                debug_cycles: self.retries,
            }),
            Phase::Failed => Some(SessionOutcome::Failed {
                debug_cycles: self.retries,
                diagnostics: self
                    .last_report
                    .as_ref()
                    .map(ValidationReport::error_messages)
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }

    fn ensure_mutable(&self) -> Result<(), TransitionError> {
        if self.terminal {
            return Err(TransitionError::Terminal {
                session_id: self.id.clone(),
                phase: self.phase,
            });
        }
        Ok(())
    }
}
