//! The handoff controller: the state machine that decides which agent answers
//! each user turn.
//!
//! A [`HandoffController`] owns one [`AgentRegistry`] and one
//! [`SessionState`]. For every user message it:
//!
//! 1. Parses the message into a [`ParsedIntent`].
//! 2. Asks for clarification when the message mixes "the previous agent" with
//!    another agent.
//! 3. Routes multi-intent messages, meta-requests ("tell Agent B ...", "what
//!    did Agent A say?") and direct handoff requests.
//! 4. Dispatches to the current agent, then keeps dispatching while the last
//!    pass ended in a handoff, handing each receiver a structured context
//!    payload. The chain is bounded by [`HandoffConfig::max_handoff_chain`].
//!
//! Agents request handoffs themselves through the [`TurnContext`] passed to
//! [`ConversationalAgent::respond`](crate::ConversationalAgent::respond).
//! Routing errors come back to them as text, never as `Err`.
//!
//! # Example
//!
//! ```rust,no_run
//! use handoff_orchestrator::{
//!     default_agent_cards, AgentRegistry, HandoffConfig, HandoffController, ScriptedAgent,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut cards = default_agent_cards().into_iter();
//!     let mut registry = AgentRegistry::new(Box::new(ScriptedAgent::new(cards.next().unwrap())));
//!     for card in cards {
//!         registry.register(Box::new(ScriptedAgent::new(card)))?;
//!     }
//!
//!     let mut controller = HandoffController::new(registry, HandoffConfig::default())?;
//!     let outcome = controller.process("I want to talk to Agent A").await?;
//!     println!("{}: {}", outcome.replies[0].agent_name, outcome.replies[0].content);
//!     assert_eq!(controller.state().current_agent(), "agent_a");
//!     Ok(())
//! }
//! ```

use crate::orchestrator::agent::AgentResponse;
use crate::orchestrator::config::HandoffConfig;
use crate::orchestrator::context::{self, context_json, history_json, HandoffPayload};
use crate::orchestrator::event::{EventHandler, HandoffEvent};
use crate::orchestrator::intent::{
    strip_match, IntentParser, MetaKind, MetaRequest, ParsedIntent, RequestType,
    PREVIOUS_REFERENCE,
};
use crate::orchestrator::memory::preview;
use crate::orchestrator::reference;
use crate::orchestrator::registry::{AgentRegistry, RegistryError, Roster};
use crate::orchestrator::relay;
use crate::orchestrator::session::{
    AgentTarget, ClarificationRequest, HandoffRecord, MultiAgentRequest, SessionState,
};
use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Result type for fallible controller and agent operations.
pub type HandoffResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Reply surfaced when a turn needs more chained handoffs than allowed.
pub const ROUTING_FALLBACK: &str = "I'm unable to resolve routing for this request right now. Please tell me which agent you would like to talk to.";

lazy_static! {
    static ref CAPABILITY_QUESTION: Regex =
        Regex::new(r"(?i)\bwhat\s+(?:can|do(?:es)?)\b").unwrap();
}

/// Why a handoff was refused. The `Display` text is what the requesting
/// agent sees as its tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffError {
    InvalidAgent { name: String, valid: Vec<String> },
    AlreadyHandedOff,
    SelfHandoff(String),
    HandoffsDisabled,
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffError::InvalidAgent { name, valid } => {
                let valid = valid
                    .iter()
                    .map(|v| format!("'{}'", v))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "Error: Invalid agent name '{}'. The agent name must be one of: {}.",
                    name, valid
                )
            }
            HandoffError::AlreadyHandedOff => {
                write!(f, "Error: You can only hand off once per query.")
            }
            HandoffError::SelfHandoff(agent) => write!(f, "Error: Already speaking with {}.", agent),
            HandoffError::HandoffsDisabled => {
                write!(f, "Error: Handoffs are not available for this request.")
            }
        }
    }
}

impl Error for HandoffError {}

/// Validates and applies one handoff.
///
/// Checks run in order: unknown target, a handoff already taken this pass,
/// target equal to the current agent. State is untouched on error.
pub(crate) fn transition(
    state: &mut SessionState,
    roster: Roster<'_>,
    target: &str,
) -> Result<HandoffRecord, HandoffError> {
    if !roster.contains(target) {
        return Err(HandoffError::InvalidAgent {
            name: target.to_string(),
            valid: roster.ids().into_iter().map(|s| s.to_string()).collect(),
        });
    }
    if state.just_handed_off {
        return Err(HandoffError::AlreadyHandedOff);
    }
    if state.current_agent == target {
        return Err(HandoffError::SelfHandoff(target.to_string()));
    }

    state.just_handed_off = true;
    state.previous_agent = std::mem::replace(&mut state.current_agent, target.to_string());
    let record = HandoffRecord {
        from: state.previous_agent.clone(),
        to: target.to_string(),
        timestamp: Utc::now(),
    };
    state.handoff_history.push(record.clone());
    log::info!("Handing off from {} to {}", record.from, record.to);
    Ok(record)
}

/// Routing capabilities handed to an agent for the duration of one dispatch.
pub struct TurnContext<'a> {
    state: &'a mut SessionState,
    roster: Roster<'a>,
    user_message: &'a str,
    handoffs_enabled: bool,
    rejections: Vec<(String, String)>,
}

impl<'a> TurnContext<'a> {
    pub fn new(
        state: &'a mut SessionState,
        roster: Roster<'a>,
        user_message: &'a str,
        handoffs_enabled: bool,
    ) -> Self {
        TurnContext {
            state,
            roster,
            user_message,
            handoffs_enabled,
            rejections: Vec::new(),
        }
    }

    /// The user's message for this turn, without routing payloads.
    pub fn user_message(&self) -> &str {
        self.user_message
    }

    pub fn roster(&self) -> Roster<'a> {
        self.roster
    }

    pub fn handoffs_enabled(&self) -> bool {
        self.handoffs_enabled
    }

    pub fn current_agent(&self) -> &str {
        &self.state.current_agent
    }

    pub fn previous_agent(&self) -> &str {
        &self.state.previous_agent
    }

    /// True once a handoff succeeded in this pass.
    pub fn handed_off(&self) -> bool {
        self.state.just_handed_off
    }

    /// Hands the conversation to any registered agent.
    pub fn handoff(&mut self, target: &str) -> String {
        if !self.handoffs_enabled {
            return self.reject(target, HandoffError::HandoffsDisabled);
        }
        match transition(self.state, self.roster, target) {
            Ok(record) => format!(
                "The conversation will be handed over to {}. No need to respond!",
                self.roster.name(&record.to)
            ),
            Err(e) => self.reject(target, e),
        }
    }

    /// Like [`handoff`](TurnContext::handoff) but only accepts specialists.
    pub fn handoff_to_specialist(&mut self, target: &str) -> String {
        if target == self.roster.triage_id() || !self.roster.contains(target) {
            let valid = self
                .roster
                .specialists()
                .map(|c| c.id.clone())
                .collect();
            return self.reject(
                target,
                HandoffError::InvalidAgent {
                    name: target.to_string(),
                    valid,
                },
            );
        }
        self.handoff(target)
    }

    pub fn handoff_back_to_triage(&mut self) -> String {
        let triage = self.roster.triage_id();
        self.handoff(triage)
    }

    /// Stores a request spanning two agents and hands off to the primary.
    ///
    /// When the primary is the current agent no handoff happens now; the
    /// controller moves the conversation to the secondary once this agent has
    /// answered.
    pub fn request_multi_agent(
        &mut self,
        primary: &str,
        secondary: &str,
        primary_message: &str,
        secondary_message: &str,
    ) -> String {
        if !self.handoffs_enabled {
            return self.reject(primary, HandoffError::HandoffsDisabled);
        }
        for agent in [primary, secondary].iter() {
            if !self.roster.contains(agent) {
                let valid = self.roster.ids().into_iter().map(|s| s.to_string()).collect();
                return self.reject(
                    agent,
                    HandoffError::InvalidAgent {
                        name: agent.to_string(),
                        valid,
                    },
                );
            }
        }

        let primary_is_current = self.state.current_agent == primary;
        self.state.multi_agent_request = Some(MultiAgentRequest {
            primary: AgentTarget {
                agent: primary.to_string(),
                message: primary_message.to_string(),
            },
            secondary: AgentTarget {
                agent: secondary.to_string(),
                message: secondary_message.to_string(),
            },
            processed: primary_is_current,
        });

        if primary_is_current {
            return format!(
                "Answer the first part now. The conversation will then move to {}.",
                self.roster.name(secondary)
            );
        }
        let result = self.handoff(primary);
        if !self.state.just_handed_off {
            self.state.multi_agent_request = None;
        }
        result
    }

    /// Records that the user has to choose between `options`.
    pub fn request_clarification(&mut self, kind: &str, options: Vec<String>) -> String {
        let options_text = options
            .iter()
            .map(|o| format!("'{}'", o))
            .collect::<Vec<_>>()
            .join(", ");
        self.state.needs_clarification = Some(ClarificationRequest {
            kind: kind.to_string(),
            options,
        });
        format!("Clarification needed for {}. Options: {}", kind, options_text)
    }

    fn reject(&mut self, target: &str, error: HandoffError) -> String {
        let reason = error.to_string();
        log::warn!("Rejected handoff to {}: {}", target, reason);
        self.rejections.push((target.to_string(), reason.clone()));
        reason
    }

    fn into_rejections(self) -> Vec<(String, String)> {
        self.rejections
    }
}

/// Result of one agent invocation.
pub(crate) struct Dispatch {
    pub response: AgentResponse,
    pub handoffs: Vec<HandoffRecord>,
    pub rejections: Vec<(String, String)>,
}

/// Invokes `agent_id` and records the exchange in its memory and in the
/// rolling conversation context.
pub(crate) async fn invoke_agent(
    registry: &mut AgentRegistry,
    state: &mut SessionState,
    agent_id: &str,
    message: &str,
    user_message: &str,
    handoffs_enabled: bool,
) -> HandoffResult<Dispatch> {
    let history_len = state.handoff_history.len();
    let (entry, roster) = registry
        .checkout(agent_id)
        .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;

    let mut ctx = TurnContext::new(state, roster, user_message, handoffs_enabled);
    let response = entry.agent.respond(message, &mut ctx).await?;
    let rejections = ctx.into_rejections();

    entry.memory.record(user_message, &response.content);
    state.record_response(agent_id, &response.content);
    log::debug!(
        "{} responded with {} chars ({} tool result(s))",
        agent_id,
        response.content.len(),
        response.tool_results.len()
    );

    Ok(Dispatch {
        response,
        handoffs: state.handoff_history[history_len..].to_vec(),
        rejections,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    Answer,
    Clarification,
    MetaAnswer,
    RoutingFallback,
}

/// A reply produced during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub agent_id: String,
    pub agent_name: String,
    pub content: String,
    pub kind: ReplyKind,
}

/// Everything that happened while processing one user message.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub intent: ParsedIntent,
    /// Replies meant for the user, in the order they settled.
    pub replies: Vec<AgentReply>,
    /// Replies superseded by a handoff in the same pass.
    pub suppressed: Vec<AgentReply>,
    /// Handoffs that happened during this turn.
    pub handoffs: Vec<HandoffRecord>,
    pub clarification: Option<ClarificationRequest>,
}

impl TurnOutcome {
    /// The last surfaced reply.
    pub fn reply(&self) -> Option<&AgentReply> {
        self.replies.last()
    }
}

/// Receives surfaced replies as soon as they settle.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn on_reply(&self, _reply: &AgentReply) -> HandoffResult<()> {
        Ok(())
    }
}

/// A [`ReplySink`] that discards everything.
pub struct NoopSink;

#[async_trait]
impl ReplySink for NoopSink {}

/// Routes user turns across the registered agents.
pub struct HandoffController {
    registry: AgentRegistry,
    parser: IntentParser,
    state: SessionState,
    config: HandoffConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl HandoffController {
    pub fn new(registry: AgentRegistry, config: HandoffConfig) -> HandoffResult<Self> {
        let parser = IntentParser::new(registry.cards())?;
        let state = SessionState::new(registry.triage_id());
        log::info!(
            "Handoff controller ready with agents {:?} (session {})",
            registry.ids(),
            state.session_id
        );
        Ok(HandoffController {
            registry,
            parser,
            state,
            config,
            event_handler: None,
        })
    }

    /// Resumes a previously saved session. Both `current_agent` and
    /// `previous_agent` must be registered.
    pub fn with_state(mut self, state: SessionState) -> HandoffResult<Self> {
        for id in [&state.current_agent, &state.previous_agent].iter() {
            if !self.registry.contains(id) {
                return Err(Box::new(RegistryError::UnknownAgent(id.to_string())));
            }
        }
        self.state = state;
        Ok(self)
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    pub fn parser(&self) -> &IntentParser {
        &self.parser
    }

    /// Applies a handoff outside of an agent dispatch.
    pub fn request_handoff(&mut self, target: &str) -> Result<HandoffRecord, HandoffError> {
        transition(&mut self.state, self.registry.roster(), target)
    }

    /// Summary of `agent_id`'s conversation so far.
    pub async fn summarize(&mut self, agent_id: &str) -> HandoffResult<String> {
        context::summarize(&mut self.registry, agent_id).await
    }

    /// Sends `message` to `target` on behalf of the current agent without
    /// changing who owns the conversation.
    pub async fn relay(&mut self, target: &str, message: &str) -> HandoffResult<String> {
        let relayed =
            relay::relay_message(&mut self.registry, &mut self.state, target, message).await?;
        if self.registry.contains(target) {
            self.emit(HandoffEvent::RelayCompleted {
                session_id: self.state.session_id.clone(),
                from: self.state.current_agent.clone(),
                target: target.to_string(),
            })
            .await;
        }
        Ok(relayed)
    }

    /// Processes one user message.
    pub async fn process(&mut self, user_message: &str) -> HandoffResult<TurnOutcome> {
        self.process_with_sink(user_message, &NoopSink).await
    }

    /// Processes one user message, pushing each surfaced reply to `sink` as
    /// soon as it settles.
    pub async fn process_with_sink(
        &mut self,
        user_message: &str,
        sink: &dyn ReplySink,
    ) -> HandoffResult<TurnOutcome> {
        self.state.just_handed_off = false;
        self.state.needs_clarification = None;
        self.state.multi_agent_request = None;
        // Normally drained within the turn; leftovers come from a failed turn.
        self.state.pending_intents.clear();
        let history_start = self.state.handoff_history.len();

        let intent = self.parser.parse(user_message);
        log::info!(
            "Turn on {}: {:?} \"{}\"",
            self.state.current_agent,
            intent.kind,
            preview(user_message, self.config.message_preview_chars)
        );
        self.emit(HandoffEvent::TurnStarted {
            session_id: self.state.session_id.clone(),
            current_agent: self.state.current_agent.clone(),
            request_type: intent.kind,
            message_preview: preview(user_message, self.config.message_preview_chars),
        })
        .await;

        let mut outcome = TurnOutcome {
            intent: intent.clone(),
            replies: Vec::new(),
            suppressed: Vec::new(),
            handoffs: Vec::new(),
            clarification: None,
        };

        if intent.clarification_needed {
            self.clarify(&intent, user_message, sink, &mut outcome).await?;
            return Ok(self.finish(outcome, history_start).await);
        }

        let mut focus = user_message.to_string();
        let mut addenda = Vec::new();

        match intent.kind {
            RequestType::MultiIntent => {
                if let Some(first) = intent.sub_intents.first() {
                    let target = first
                        .primary_target()
                        .filter(|t| first.kind == RequestType::AgentRequest && *t != PREVIOUS_REFERENCE);
                    if let Some(target) = target {
                        let rest = intent.sub_intents[1..].to_vec();
                        self.emit(HandoffEvent::IntentsDeferred {
                            session_id: self.state.session_id.clone(),
                            count: rest.len(),
                        })
                        .await;
                        self.state.pending_intents.extend(rest);
                        focus = first.original_message.clone();
                        if target != self.state.current_agent {
                            self.controller_handoff(target).await;
                        }
                    }
                }
                addenda.push(format!(
                    "The user has multiple requests in their message:\n\"{}\"\n\nPlease address each part of their request separately and clearly.",
                    user_message
                ));
            }
            RequestType::MetaRequest => {
                if self.handle_meta(&intent, user_message, sink, &mut outcome).await? {
                    return Ok(self.finish(outcome, history_start).await);
                }
            }
            RequestType::AgentRequest => {
                if let Some(target) = intent.primary_target() {
                    let target = reference::resolve(target, &self.state);
                    if target != self.state.current_agent {
                        self.controller_handoff(&target).await;
                    }
                }
            }
            RequestType::GeneralQuery => {}
        }

        self.run_chain(user_message, &intent, focus, addenda, sink, &mut outcome)
            .await?;
        Ok(self.finish(outcome, history_start).await)
    }

    /// Dispatches to the current agent and follows handoffs until an agent
    /// answers without handing off, or the chain limit is reached.
    async fn run_chain(
        &mut self,
        user_message: &str,
        intent: &ParsedIntent,
        mut focus: String,
        mut addenda: Vec<String>,
        sink: &dyn ReplySink,
        outcome: &mut TurnOutcome,
    ) -> HandoffResult<()> {
        let mut pass = 0;
        let mut chained = 0;

        loop {
            let message = if self.state.just_handed_off {
                if chained >= self.config.max_handoff_chain {
                    return self.routing_fallback(sink, outcome).await;
                }
                chained += 1;
                self.state.just_handed_off = false;
                let extra = std::mem::take(&mut addenda);
                self.handoff_payload(user_message, &mut focus, extra).await?
            } else {
                let mut message = self.enrich(user_message, intent);
                addenda.extend(self.pending_addendum());
                for addendum in addenda.drain(..) {
                    message.push_str("\n\n");
                    message.push_str(&addendum);
                }
                message
            };

            let agent_id = self.state.current_agent.clone();
            self.emit(HandoffEvent::AgentDispatched {
                session_id: self.state.session_id.clone(),
                agent_id: agent_id.clone(),
                pass,
            })
            .await;

            let dispatch = invoke_agent(
                &mut self.registry,
                &mut self.state,
                &agent_id,
                &message,
                user_message,
                true,
            )
            .await?;
            self.report(&dispatch).await;

            if !self.state.just_handed_off {
                self.chain_next_hop(&mut focus).await;
            }

            let surfaced = !self.state.just_handed_off;
            let reply = self.reply(&agent_id, dispatch.response.content, ReplyKind::Answer);
            self.emit(HandoffEvent::AgentResponded {
                session_id: self.state.session_id.clone(),
                agent_id: agent_id.clone(),
                pass,
                surfaced,
                response_length: reply.content.len(),
            })
            .await;

            if surfaced {
                sink.on_reply(&reply).await?;
                outcome.replies.push(reply);
                return Ok(());
            }
            log::debug!("Suppressing reply from {} after handoff", agent_id);
            outcome.suppressed.push(reply);
            pass += 1;
        }
    }

    /// Builds the message for the agent that just received the conversation.
    async fn handoff_payload(
        &mut self,
        user_message: &str,
        focus: &mut String,
        extra: Vec<String>,
    ) -> HandoffResult<String> {
        let previous = self.state.previous_agent.clone();
        let current = self.state.current_agent.clone();

        let summary = context::summarize(&mut self.registry, &previous).await?;
        log::info!("Summary of {} before handoff: {}", previous, preview(&summary, self.config.message_preview_chars));
        self.state
            .record_summary(&previous, summary.clone(), Some(user_message.to_string()));

        let roster = self.registry.roster();
        let mut payload = HandoffPayload::new(
            &roster.name(&previous),
            &roster.name(&current),
            &summary,
            user_message,
            &self.state.handoff_history,
            self.state.conversation_context.as_ref(),
        );

        if let Some(request) = self.state.multi_agent_request.as_mut() {
            if !request.processed && request.primary.agent == current {
                *focus = request.primary.message.clone();
                request.processed = true;
            }
        }
        if focus.as_str() != user_message {
            payload.push_addendum(format!(
                "The user specifically wanted you to address this: {}",
                focus
            ));
        }
        for addendum in extra {
            payload.push_addendum(addendum);
        }
        if let Some(pending) = self.pending_addendum() {
            payload.push_addendum(pending);
        }
        Ok(payload.render())
    }

    fn pending_addendum(&self) -> Option<String> {
        if self.state.pending_intents.is_empty() {
            return None;
        }
        let mut addendum = "The user also had these additional requests:".to_string();
        for intent in &self.state.pending_intents {
            addendum.push_str(&format!("\n- {}", intent.original_message));
        }
        Some(addendum)
    }

    /// After an agent answered without handing off, moves the conversation to
    /// the next planned hop: the secondary of a multi-agent request, then the
    /// next queued sub-intent.
    async fn chain_next_hop(&mut self, focus: &mut String) {
        let current = self.state.current_agent.clone();

        if let Some(request) = self.state.multi_agent_request.clone() {
            if request.processed && request.primary.agent == current {
                self.state.multi_agent_request = None;
                if self.controller_handoff(&request.secondary.agent).await {
                    *focus = request.secondary.message;
                    return;
                }
            }
        }

        while let Some(next) = self.state.pending_intents.pop_front() {
            if next.kind != RequestType::AgentRequest {
                continue;
            }
            let target = match next.primary_target() {
                Some(target) => reference::resolve(target, &self.state),
                None => continue,
            };
            if target == current || !self.registry.contains(&target) {
                continue;
            }
            if self.controller_handoff(&target).await {
                *focus = next.original_message;
                return;
            }
        }
    }

    async fn controller_handoff(&mut self, target: &str) -> bool {
        match transition(&mut self.state, self.registry.roster(), target) {
            Ok(record) => {
                self.emit(HandoffEvent::HandoffCompleted {
                    session_id: self.state.session_id.clone(),
                    from: record.from,
                    to: record.to,
                })
                .await;
                true
            }
            Err(e) => {
                log::warn!("Handoff to {} refused: {}", target, e);
                self.emit(HandoffEvent::HandoffRejected {
                    session_id: self.state.session_id.clone(),
                    target: target.to_string(),
                    reason: e.to_string(),
                })
                .await;
                false
            }
        }
    }

    async fn routing_fallback(
        &mut self,
        sink: &dyn ReplySink,
        outcome: &mut TurnOutcome,
    ) -> HandoffResult<()> {
        log::warn!(
            "Handoff chain exceeded {} passes, stopping on {}",
            self.config.max_handoff_chain,
            self.state.current_agent
        );
        self.state.just_handed_off = false;
        self.state.pending_intents.clear();
        self.state.multi_agent_request = None;
        self.emit(HandoffEvent::ChainLimitReached {
            session_id: self.state.session_id.clone(),
            limit: self.config.max_handoff_chain,
        })
        .await;

        let agent_id = self.state.current_agent.clone();
        let reply = self.reply(&agent_id, ROUTING_FALLBACK.to_string(), ReplyKind::RoutingFallback);
        sink.on_reply(&reply).await?;
        outcome.replies.push(reply);
        Ok(())
    }

    async fn clarify(
        &mut self,
        intent: &ParsedIntent,
        user_message: &str,
        sink: &dyn ReplySink,
        outcome: &mut TurnOutcome,
    ) -> HandoffResult<()> {
        let roster = self.registry.roster();
        let options: Vec<String> = intent
            .agent_references
            .iter()
            .map(|r| {
                if r == PREVIOUS_REFERENCE {
                    let previous = reference::resolve(r, &self.state);
                    format!("the previous agent ({})", roster.name(&previous))
                } else {
                    roster.name(r)
                }
            })
            .collect();
        self.state.needs_clarification = Some(ClarificationRequest {
            kind: "agent_reference".to_string(),
            options,
        });
        self.emit(HandoffEvent::ClarificationRequested {
            session_id: self.state.session_id.clone(),
            agent_id: self.state.current_agent.clone(),
            references: intent.agent_references.clone(),
        })
        .await;

        let message = format!(
            "The user's request is ambiguous. They mentioned multiple agents or used ambiguous references.\nOriginal message: \"{}\"\n\nPlease ask for clarification about which agent they want to interact with.",
            user_message
        );
        self.answer_without_handoff(&message, user_message, ReplyKind::Clarification, sink, outcome)
            .await
    }

    /// Answers recall, relay and audit requests. Returns `false` when the
    /// request has no usable target and should be handled as an ordinary
    /// message.
    async fn handle_meta(
        &mut self,
        intent: &ParsedIntent,
        user_message: &str,
        sink: &dyn ReplySink,
        outcome: &mut TurnOutcome,
    ) -> HandoffResult<bool> {
        if let Some(recall) = intent.meta(MetaKind::Recall) {
            if let Some(target) = self.meta_target(recall, intent) {
                let history = context::summarize(&mut self.registry, &target).await?;
                let message = format!(
                    "The user is asking about what {} said.\nHere is the conversation history with that agent:\n\n{}\n\nPlease summarize this information to answer the user's question: \"{}\"",
                    self.registry.roster().name(&target),
                    history,
                    user_message
                );
                self.answer_without_handoff(&message, user_message, ReplyKind::MetaAnswer, sink, outcome)
                    .await?;
                return Ok(true);
            }
        }

        if let Some(relay) = intent.meta(MetaKind::Relay) {
            if let Some(target) = self.meta_target(relay, intent) {
                let body = strip_match(user_message, &relay.text);
                let relayed = self.relay(&target, &body).await?;
                let message = format!(
                    "The user asked you to relay a message to {}.\nYou relayed: \"{}\"\n\nHere is the response:\n{}\n\nPlease format this information in a user-friendly way.",
                    self.registry.roster().name(&target),
                    body,
                    relayed
                );
                self.answer_without_handoff(&message, user_message, ReplyKind::MetaAnswer, sink, outcome)
                    .await?;
                return Ok(true);
            }
        }

        if intent.meta(MetaKind::Audit).is_some() {
            let message = format!(
                "The user is asking which agents handled the conversation.\n\n<handoff_history>\n{}\n</handoff_history>\n\nUser's question: {}",
                history_json(&self.state.handoff_history),
                user_message
            );
            self.answer_without_handoff(&message, user_message, ReplyKind::MetaAnswer, sink, outcome)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// The agent a meta-request is about, if it is registered and is not the
    /// current agent.
    fn meta_target(&self, meta: &MetaRequest, intent: &ParsedIntent) -> Option<String> {
        let candidate = meta.target.clone().or_else(|| {
            intent
                .agent_references
                .iter()
                .find(|r| *r != PREVIOUS_REFERENCE && **r != self.state.current_agent)
                .cloned()
        })?;
        let target = reference::resolve(&candidate, &self.state);
        if target == self.state.current_agent || !self.registry.contains(&target) {
            None
        } else {
            Some(target)
        }
    }

    async fn answer_without_handoff(
        &mut self,
        message: &str,
        user_message: &str,
        kind: ReplyKind,
        sink: &dyn ReplySink,
        outcome: &mut TurnOutcome,
    ) -> HandoffResult<()> {
        let agent_id = self.state.current_agent.clone();
        self.emit(HandoffEvent::AgentDispatched {
            session_id: self.state.session_id.clone(),
            agent_id: agent_id.clone(),
            pass: 0,
        })
        .await;
        let dispatch = invoke_agent(
            &mut self.registry,
            &mut self.state,
            &agent_id,
            message,
            user_message,
            false,
        )
        .await?;
        self.report(&dispatch).await;

        let reply = self.reply(&agent_id, dispatch.response.content, kind);
        self.emit(HandoffEvent::AgentResponded {
            session_id: self.state.session_id.clone(),
            agent_id,
            pass: 0,
            surfaced: true,
            response_length: reply.content.len(),
        })
        .await;
        sink.on_reply(&reply).await?;
        outcome.replies.push(reply);
        Ok(())
    }

    /// The user message, plus capability details and routing context.
    fn enrich(&self, user_message: &str, intent: &ParsedIntent) -> String {
        let mut message = user_message.to_string();

        if CAPABILITY_QUESTION.is_match(user_message) {
            let references = reference::resolve_all(&intent.agent_references, &self.state);
            if let Some(card) = references.iter().find_map(|r| self.registry.card(r)) {
                message = format!(
                    "The user is asking about {}'s capabilities.\n\nHere are the capabilities:\n{}\n\nUser's question: {}\n\nPlease use this information to answer their question.",
                    card.name,
                    card.capability_summary(),
                    user_message
                );
            }
        }

        if self.config.include_routing_context {
            message.push_str(&format!(
                "\n\n<conversation_context>\n{}\n</conversation_context>\n\n<handoff_history>\n{}\n</handoff_history>",
                context_json(self.state.conversation_context.as_ref()),
                history_json(&self.state.handoff_history)
            ));
        }
        message
    }

    fn reply(&self, agent_id: &str, content: String, kind: ReplyKind) -> AgentReply {
        AgentReply {
            agent_id: agent_id.to_string(),
            agent_name: self.registry.roster().name(agent_id),
            content,
            kind,
        }
    }

    async fn report(&self, dispatch: &Dispatch) {
        for record in &dispatch.handoffs {
            self.emit(HandoffEvent::HandoffCompleted {
                session_id: self.state.session_id.clone(),
                from: record.from.clone(),
                to: record.to.clone(),
            })
            .await;
        }
        for (target, reason) in &dispatch.rejections {
            self.emit(HandoffEvent::HandoffRejected {
                session_id: self.state.session_id.clone(),
                target: target.clone(),
                reason: reason.clone(),
            })
            .await;
        }
    }

    async fn finish(&self, mut outcome: TurnOutcome, history_start: usize) -> TurnOutcome {
        outcome.handoffs = self.state.handoff_history[history_start..].to_vec();
        outcome.clarification = self.state.needs_clarification.clone();
        log::info!(
            "Turn settled on {} after {} handoff(s)",
            self.state.current_agent,
            outcome.handoffs.len()
        );
        self.emit(HandoffEvent::TurnCompleted {
            session_id: self.state.session_id.clone(),
            current_agent: self.state.current_agent.clone(),
            handoffs: outcome.handoffs.len(),
            replies: outcome.replies.len(),
        })
        .await;
        outcome
    }

    async fn emit(&self, event: HandoffEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_handoff_event(&event).await;
        }
    }
}
