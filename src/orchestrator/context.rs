//! Context propagation across handoffs.
//!
//! When the conversation moves from one agent to another, the receiving agent
//! gets a single structured message built by [`build_handoff_payload`]. It
//! carries the outgoing agent's summary, the handoff history, the rolling
//! conversation context and the user's latest message, each in its own
//! tagged block. Chained content (a multi-agent primary request, queued
//! sub-intents) is appended as addenda through [`HandoffPayload`].

use crate::orchestrator::handoff::HandoffResult;
use crate::orchestrator::registry::{AgentRegistry, RegistryError};
use crate::orchestrator::session::{ConversationContext, HandoffRecord};

/// Summarizes `agent_id`'s transcript through its memory.
///
/// Calling this twice without a new exchange in between returns the same
/// summary and leaves the transcript untouched.
pub async fn summarize(registry: &mut AgentRegistry, agent_id: &str) -> HandoffResult<String> {
    let memory = registry
        .memory_mut(agent_id)
        .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;
    memory.update_summary().await
}

/// Structured handoff message plus any addenda.
#[derive(Clone, Debug, PartialEq)]
pub struct HandoffPayload {
    pub previous_agent: String,
    pub current_agent: String,
    pub summary: String,
    pub last_user_message: String,
    pub history_json: String,
    pub context_json: String,
    pub previous_response: Option<String>,
    pub addenda: Vec<String>,
}

impl HandoffPayload {
    pub fn new(
        previous_agent: &str,
        current_agent: &str,
        summary: &str,
        last_user_message: &str,
        history: &[HandoffRecord],
        context: Option<&ConversationContext>,
    ) -> Self {
        HandoffPayload {
            previous_agent: previous_agent.to_string(),
            current_agent: current_agent.to_string(),
            summary: summary.to_string(),
            last_user_message: last_user_message.to_string(),
            history_json: history_json(history),
            context_json: context_json(context),
            previous_response: context.map(|c| c.last_response.clone()),
            addenda: Vec::new(),
        }
    }

    pub fn push_addendum(&mut self, addendum: impl Into<String>) {
        self.addenda.push(addendum.into());
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "You've been handed off this conversation from {previous}.\n\n\
             <conversation_summary>\n{summary}\n</conversation_summary>\n\n\
             <handoff_history>\n{history}\n</handoff_history>\n\n\
             <conversation_context>\n{context}\n</conversation_context>\n\n\
             <last_user_message>\n{message}\n</last_user_message>\n\n\
             <previous_agent_context>\n{previous_response}\n</previous_agent_context>\n\n\
             Please:\n\
             1. Consult the conversation summary before answering.\n\
             2. If the user's question was already answered, acknowledge it instead of answering again, and add new information only where useful.\n\
             3. If the user asks what was discussed with {previous}, answer from the summary.\n\
             4. Address any additional requests listed below.",
            previous = self.previous_agent,
            summary = self.summary,
            history = self.history_json,
            context = self.context_json,
            message = self.last_user_message,
            previous_response = self
                .previous_response
                .as_deref()
                .unwrap_or("No previous response"),
        );
        for addendum in &self.addenda {
            out.push_str("\n\n");
            out.push_str(addendum);
        }
        out
    }
}

/// Renders the message a receiving agent gets right after a handoff.
pub fn build_handoff_payload(
    previous_agent: &str,
    current_agent: &str,
    summary: &str,
    last_user_message: &str,
    handoff_history: &[HandoffRecord],
    conversation_context: Option<&ConversationContext>,
) -> String {
    HandoffPayload::new(
        previous_agent,
        current_agent,
        summary,
        last_user_message,
        handoff_history,
        conversation_context,
    )
    .render()
}

/// Pretty JSON of the handoff history.
pub fn history_json(history: &[HandoffRecord]) -> String {
    serde_json::to_string_pretty(history).unwrap_or_else(|_| "[]".to_string())
}

/// Pretty JSON of the rolling conversation context, `{}` when empty.
pub fn context_json(context: Option<&ConversationContext>) -> String {
    match context {
        Some(context) => serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    }
}
