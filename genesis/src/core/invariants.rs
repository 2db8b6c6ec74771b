//! Semantic invariants of a session record that the type system cannot express.

use crate::core::session::Session;
use crate::core::types::Phase;

/// Check session invariants:
/// - `retries <= retry_bound`
/// - `terminal` iff the phase is COMPLETE or FAILED
/// - a COMPLETE session has an artifact location and a passing report
/// - a failed report always names at least one error
pub fn validate_session_invariants(session: &Session) -> Vec<String> {
    let mut errors = Vec::new();
    let id = session.id.as_str();

    if session.retries > session.retry_bound {
        errors.push(format!(
            "{id}: retries {} exceeds retry_bound {}",
            session.retries, session.retry_bound
        ));
    }

    if session.terminal != session.phase.is_terminal() {
        errors.push(format!(
            "{id}: terminal flag {} disagrees with phase {}",
            session.terminal, session.phase
        ));
    }

    if session.phase == Phase::Complete {
        if session.artifact_location.is_none() {
            errors.push(format!("{id}: complete without artifact location"));
        }
        if !session.last_report.as_ref().is_some_and(|r| r.success()) {
            errors.push(format!(
                "{id}: complete without a passing validation report"
            ));
        }
    }

    if let Some(report) = &session.last_report
        && report.success() != report.errors().is_empty()
    {
        errors.push(format!(
            "{id}: report success flag disagrees with error list"
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::PhaseEvent;
    use crate::core::types::{ValidationReport, ValidationTiers};
    use std::path::PathBuf;

    #[test]
    fn fresh_session_is_consistent() {
        let session = Session::new("s", "request", 3);
        assert!(validate_session_invariants(&session).is_empty());
    }

    #[test]
    fn reports_counter_and_terminal_violations() {
        let mut session = Session::new("s", "request", 1);
        session.retries = 2;
        session.terminal = true;

        let errors = validate_session_invariants(&session);
        assert!(errors.iter().any(|err| err.contains("exceeds retry_bound")));
        assert!(errors.iter().any(|err| err.contains("terminal flag")));
    }

    #[test]
    fn complete_session_needs_location_and_passing_report() {
        let mut session = Session::new("s", "request", 1);
        for event in [
            PhaseEvent::Start,
            PhaseEvent::PlanReady,
            PhaseEvent::CodeReady,
            PhaseEvent::ValidationPassed,
        ] {
            session.apply(event).expect("transition");
        }

        let errors = validate_session_invariants(&session);
        assert_eq!(errors.len(), 2);

        session.artifact_location = Some(PathBuf::from("out/game.html"));
        session.last_report = Some(ValidationReport::new(
            Vec::new(),
            Vec::new(),
            ValidationTiers::default(),
        ));
        assert!(validate_session_invariants(&session).is_empty());
    }
}
