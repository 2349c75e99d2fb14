//! Relaying a message to another agent without handing off.

use crate::orchestrator::handoff::{invoke_agent, HandoffError, HandoffResult};
use crate::orchestrator::registry::AgentRegistry;
use crate::orchestrator::session::SessionState;

/// Asks `target` to answer `message` on behalf of the current agent.
///
/// `current_agent`, `previous_agent` and the handoff history are left as they
/// were; the target cannot hand off while answering. An unknown target
/// yields the invalid-agent error text rather than an `Err`.
pub async fn relay_message(
    registry: &mut AgentRegistry,
    state: &mut SessionState,
    target: &str,
    message: &str,
) -> HandoffResult<String> {
    if !registry.contains(target) {
        let error = HandoffError::InvalidAgent {
            name: target.to_string(),
            valid: registry.ids().into_iter().map(|s| s.to_string()).collect(),
        };
        log::warn!("Relay refused: {}", error);
        return Ok(error.to_string());
    }

    let roster = registry.roster();
    let sender = roster.name(state.current_agent());
    let target_name = roster.name(target);
    let framed = format!(
        "This is a relay message from {}.\nPlease respond to the following query without greeting the user:\n\n{}",
        sender, message
    );

    log::info!("Relaying from {} to {}", state.current_agent(), target);
    let dispatch = invoke_agent(registry, state, target, &framed, message, false).await?;
    Ok(format!(
        "Relayed response from {}: {}",
        target_name, dispatch.response.content
    ))
}
