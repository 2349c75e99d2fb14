//! Resolution of relative agent references.

use crate::orchestrator::intent::PREVIOUS_REFERENCE;
use crate::orchestrator::session::SessionState;

/// Maps `"previous"` to the agent that held the conversation before the last
/// handoff. Every other reference is already an agent id and is returned
/// unchanged.
pub fn resolve(reference: &str, session: &SessionState) -> String {
    if reference == PREVIOUS_REFERENCE {
        session.previous_agent().to_string()
    } else {
        reference.to_string()
    }
}

/// Resolves every reference of a parsed intent, keeping order and dropping
/// duplicates introduced by the resolution.
pub fn resolve_all(references: &[String], session: &SessionState) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::with_capacity(references.len());
    for reference in references {
        let id = resolve(reference, session);
        if !resolved.contains(&id) {
            resolved.push(id);
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_falls_back_to_triage_on_a_fresh_session() {
        let session = SessionState::new("triage");
        assert_eq!(resolve("previous", &session), "triage");
        assert_eq!(resolve("agent_b", &session), "agent_b");
    }

    #[test]
    fn resolve_all_dedupes_after_resolution() {
        let mut session = SessionState::new("triage");
        session.previous_agent = "agent_a".into();
        let refs = vec!["agent_a".to_string(), "previous".to_string(), "agent_b".to_string()];
        assert_eq!(resolve_all(&refs, &session), vec!["agent_a", "agent_b"]);
    }
}
