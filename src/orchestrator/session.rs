//! Per-conversation routing state.
//!
//! [`SessionState`] is owned exclusively by one
//! [`HandoffController`](crate::HandoffController). Every type in this module
//! derives serde so a [`SessionStore`](crate::SessionStore) can snapshot it.

use crate::orchestrator::intent::ParsedIntent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// One completed transfer of conversational ownership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

/// An agent plus the portion of the user's message addressed to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentTarget {
    pub agent: String,
    pub message: String,
}

/// A request that spans two agents: the primary answers first, then the
/// conversation moves to the secondary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiAgentRequest {
    pub primary: AgentTarget,
    pub secondary: AgentTarget,
    pub processed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub kind: String,
    pub options: Vec<String>,
}

/// Rolling cache of the latest agent reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub last_response: String,
    pub last_agent: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary taken when the conversation moved away from an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub last_message: Option<String>,
}

/// Routing state for a single conversation.
///
/// `current_agent` and `previous_agent` always name registered agents; the
/// controller validates every transition before it touches them.
/// `handoff_history` is append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub(crate) session_id: String,
    pub(crate) current_agent: String,
    pub(crate) previous_agent: String,
    pub(crate) just_handed_off: bool,
    pub(crate) handoff_history: Vec<HandoffRecord>,
    pub(crate) pending_intents: VecDeque<ParsedIntent>,
    pub(crate) multi_agent_request: Option<MultiAgentRequest>,
    pub(crate) needs_clarification: Option<ClarificationRequest>,
    pub(crate) conversation_context: Option<ConversationContext>,
    pub(crate) summary: Option<String>,
    pub(crate) agent_summaries: BTreeMap<String, Vec<SummarySnapshot>>,
}

impl SessionState {
    /// Fresh state with both `current_agent` and `previous_agent` set to the
    /// triage agent.
    pub fn new(triage_id: &str) -> Self {
        SessionState {
            session_id: Uuid::new_v4().to_string(),
            current_agent: triage_id.to_string(),
            previous_agent: triage_id.to_string(),
            just_handed_off: false,
            handoff_history: Vec::new(),
            pending_intents: VecDeque::new(),
            multi_agent_request: None,
            needs_clarification: None,
            conversation_context: None,
            summary: None,
            agent_summaries: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_agent(&self) -> &str {
        &self.current_agent
    }

    pub fn previous_agent(&self) -> &str {
        &self.previous_agent
    }

    pub fn just_handed_off(&self) -> bool {
        self.just_handed_off
    }

    pub fn handoff_history(&self) -> &[HandoffRecord] {
        &self.handoff_history
    }

    pub fn pending_intents(&self) -> &VecDeque<ParsedIntent> {
        &self.pending_intents
    }

    pub fn multi_agent_request(&self) -> Option<&MultiAgentRequest> {
        self.multi_agent_request.as_ref()
    }

    pub fn needs_clarification(&self) -> Option<&ClarificationRequest> {
        self.needs_clarification.as_ref()
    }

    pub fn conversation_context(&self) -> Option<&ConversationContext> {
        self.conversation_context.as_ref()
    }

    /// The summary produced by the most recent handoff, if any.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn agent_summaries(&self, agent_id: &str) -> &[SummarySnapshot] {
        self.agent_summaries
            .get(agent_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn record_response(&mut self, agent_id: &str, content: &str) {
        self.conversation_context = Some(ConversationContext {
            last_response: content.to_string(),
            last_agent: agent_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn record_summary(
        &mut self,
        agent_id: &str,
        summary: String,
        last_message: Option<String>,
    ) {
        self.agent_summaries
            .entry(agent_id.to_string())
            .or_default()
            .push(SummarySnapshot {
                timestamp: Utc::now(),
                summary: summary.clone(),
                last_message,
            });
        self.summary = Some(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_on_triage() {
        let state = SessionState::new("triage");
        assert_eq!(state.current_agent(), "triage");
        assert_eq!(state.previous_agent(), "triage");
        assert!(!state.just_handed_off());
        assert!(state.handoff_history().is_empty());
        assert_eq!(state.session_id().len(), 36);
    }

    #[test]
    fn snapshots_accumulate_per_agent() {
        let mut state = SessionState::new("triage");
        state.record_summary("agent_a", "first".into(), None);
        state.record_summary("agent_a", "second".into(), Some("hi".into()));
        assert_eq!(state.agent_summaries("agent_a").len(), 2);
        assert_eq!(state.summary(), Some("second"));
        assert!(state.agent_summaries("agent_b").is_empty());
    }
}
