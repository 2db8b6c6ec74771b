//! Phase transition table for a generation session.
//!
//! ```text
//! INITIALIZING -> ARCHITECT -> ENGINEER -> VALIDATE -> COMPLETE
//!                                             |  ^
//!                                             v  |
//!                                           DEBUGGER
//!                               (VALIDATE with budget spent) -> FAILED
//! ```

use thiserror::Error;

use crate::core::types::Phase;

/// Input that drives a session from one phase to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Session accepted; start design work.
    Start,
    /// Design and plan text obtained.
    PlanReady,
    /// Code produced and normalized.
    CodeReady,
    /// Every enabled validation tier succeeded.
    ValidationPassed,
    /// At least one validation tier failed.
    ValidationFailed,
    /// Debugger produced a repaired artifact.
    Repaired,
    /// Internal defect; end the session without further work.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} on {event:?}")]
    Illegal { from: Phase, event: PhaseEvent },
    #[error("session {session_id} is terminal ({phase}) and can no longer change")]
    Terminal { session_id: String, phase: Phase },
}

/// Compute the phase that follows `from` on `event`.
///
/// `retries` is the number of repair cycles already spent and `retry_bound`
/// the maximum. A failed validation routes to the debugger only while
/// `retries < retry_bound`; otherwise the session fails.
pub fn advance(
    from: Phase,
    event: PhaseEvent,
    retries: u32,
    retry_bound: u32,
) -> Result<Phase, TransitionError> {
    let next = match (from, event) {
        (Phase::Initializing, PhaseEvent::Start) => Phase::Architect,
        (Phase::Architect, PhaseEvent::PlanReady) => Phase::Engineer,
        (Phase::Engineer, PhaseEvent::CodeReady) => Phase::Validate,
        (Phase::Validate, PhaseEvent::ValidationPassed) => Phase::Complete,
        (Phase::Validate, PhaseEvent::ValidationFailed) if retries < retry_bound => Phase::Debugger,
        (Phase::Validate, PhaseEvent::ValidationFailed) => Phase::Failed,
        (Phase::Debugger, PhaseEvent::Repaired) => Phase::Validate,
        (phase, PhaseEvent::Abort) if !phase.is_terminal() => Phase::Failed,
        (from, event) => return Err(TransitionError::Illegal { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_complete() {
        let mut phase = Phase::Initializing;
        for event in [
            PhaseEvent::Start,
            PhaseEvent::PlanReady,
            PhaseEvent::CodeReady,
            PhaseEvent::ValidationPassed,
        ] {
            phase = advance(phase, event, 0, 3).expect("legal transition");
        }
        assert_eq!(phase, Phase::Complete);
    }

    #[test]
    fn failed_validation_routes_to_debugger_while_budget_remains() {
        assert_eq!(
            advance(Phase::Validate, PhaseEvent::ValidationFailed, 2, 3),
            Ok(Phase::Debugger)
        );
        assert_eq!(
            advance(Phase::Validate, PhaseEvent::ValidationFailed, 3, 3),
            Ok(Phase::Failed)
        );
    }

    #[test]
    fn zero_budget_fails_on_first_failed_validation() {
        assert_eq!(
            advance(Phase::Validate, PhaseEvent::ValidationFailed, 0, 0),
            Ok(Phase::Failed)
        );
    }

    #[test]
    fn repair_returns_to_validate() {
        assert_eq!(
            advance(Phase::Debugger, PhaseEvent::Repaired, 1, 3),
            Ok(Phase::Validate)
        );
    }

    #[test]
    fn abort_is_legal_from_any_live_phase() {
        for phase in [
            Phase::Initializing,
            Phase::Architect,
            Phase::Engineer,
            Phase::Validate,
            Phase::Debugger,
        ] {
            assert_eq!(advance(phase, PhaseEvent::Abort, 0, 3), Ok(Phase::Failed));
        }
    }

    #[test]
    fn terminal_phases_accept_nothing() {
        for phase in [Phase::Complete, Phase::Failed] {
            for event in [
                PhaseEvent::Start,
                PhaseEvent::PlanReady,
                PhaseEvent::CodeReady,
                PhaseEvent::ValidationPassed,
                PhaseEvent::ValidationFailed,
                PhaseEvent::Repaired,
                PhaseEvent::Abort,
            ] {
                assert!(advance(phase, event, 0, 3).is_err(), "{phase} on {event:?}");
            }
        }
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let err = advance(Phase::Architect, PhaseEvent::CodeReady, 0, 3).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: Phase::Architect,
                event: PhaseEvent::CodeReady
            }
        );
        assert!(advance(Phase::Engineer, PhaseEvent::Repaired, 0, 3).is_err());
        assert!(advance(Phase::Debugger, PhaseEvent::ValidationPassed, 0, 3).is_err());
    }
}
