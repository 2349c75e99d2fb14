//! Conversational agents and their identity cards.
//!
//! The controller never generates text itself: every reply comes from a
//! [`ConversationalAgent`]. Two implementations ship with the crate:
//!
//! * [`LlmAgent`] wraps a [`ClientWrapper`] in an [`LLMSession`] and exposes the
//!   routing tools (`handoff_to_agent`, `handoff_back_to_triage`,
//!   `handle_multi_agent_request`, `clarify_ambiguous_request`) through the
//!   JSON tool-call protocol:
//!
//!   ```text
//!   {"tool_call": {"name": "handoff_to_agent", "parameters": {"agent_name": "agent_b"}}}
//!   ```
//!
//! * [`ScriptedAgent`] answers from a fixed rule list. It is deterministic and
//!   is what the test-suite and the offline playground use.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use handoff_orchestrator::{AgentCard, ClientWrapper, LlmAgent};
//!
//! # fn build(client: Arc<dyn ClientWrapper>) {
//! let card = AgentCard::new("agent_a", "Agent A")
//!     .with_description("Specialized agent A")
//!     .can_handle("agent_a_specific_tasks")
//!     .cannot_handle("agent_b_specific_tasks");
//! let agent = LlmAgent::new(card, client)
//!     .with_instructions("You are a friendly cooking expert.")
//!     .with_streaming(true);
//! # }
//! ```

use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::orchestrator::handoff::{HandoffResult, TurnContext};
use crate::orchestrator::llm_session::LLMSession;
use crate::orchestrator::registry::Roster;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Identity and capabilities of an agent.
///
/// `aliases` are extra case-insensitive regex fragments the intent parser
/// accepts as references to this agent. Fragments derived from `id` and
/// `name` are always included, see [`AgentCard::alias_patterns`].
///
/// `short_name` is a case-sensitive bare token such as `"A"`. On its own it
/// only counts as a reference after a routing word ("talk to A", "tell B"),
/// so the article in "A quick question" is never read as an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub can_handle: Vec<String>,
    pub cannot_handle: Vec<String>,
    pub aliases: Vec<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

impl AgentCard {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        AgentCard {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            can_handle: Vec::new(),
            cannot_handle: Vec::new(),
            aliases: Vec::new(),
            short_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn can_handle(mut self, capability: impl Into<String>) -> Self {
        self.can_handle.push(capability.into());
        self
    }

    pub fn cannot_handle(mut self, capability: impl Into<String>) -> Self {
        self.cannot_handle.push(capability.into());
        self
    }

    /// Adds a regex fragment that refers to this agent.
    ///
    /// Fragments are matched case-insensitively; wrap a fragment in
    /// `(?-i:...)` to make it case-sensitive. For single letters use
    /// [`with_short_name`](AgentCard::with_short_name) instead.
    pub fn with_alias(mut self, pattern: impl Into<String>) -> Self {
        self.aliases.push(pattern.into());
        self
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    /// Every fragment that names this agent once a rule has matched the
    /// routing verb: the escaped id, the display name with flexible spacing,
    /// the custom aliases, then the bare short name.
    pub fn alias_patterns(&self) -> Vec<String> {
        let mut patterns = self.named_patterns();
        if let Some(short) = &self.short_name {
            patterns.push(format!(r"\b(?-i:{})\b", regex::escape(short)));
        }
        patterns
    }

    /// Fragments that refer to this agent anywhere in a message. Same as
    /// [`alias_patterns`](AgentCard::alias_patterns) except that the short
    /// name has to follow a routing word.
    pub fn reference_patterns(&self) -> Vec<String> {
        let mut patterns = self.named_patterns();
        if let Some(short) = &self.short_name {
            patterns.push(format!(
                r"\b(?:to|with|ask|tell|and|or|than|from)\s+(?:the\s+)?(?-i:{})\b",
                regex::escape(short)
            ));
        }
        patterns
    }

    fn named_patterns(&self) -> Vec<String> {
        let mut patterns = vec![word_pattern(&[self.id.as_str()])];
        let words: Vec<&str> = self.name.split_whitespace().collect();
        if !words.is_empty() {
            patterns.push(word_pattern(&words));
        }
        for alias in &self.aliases {
            if !patterns.contains(alias) {
                patterns.push(alias.clone());
            }
        }
        patterns
    }

    /// Human-readable capability block, used when the user asks what an
    /// agent can do.
    pub fn capability_summary(&self) -> String {
        format!(
            "Description: {}\nCan handle: {}\nCannot handle: {}",
            self.description,
            self.can_handle.join(", "),
            self.cannot_handle.join(", ")
        )
    }
}

fn word_pattern(words: &[&str]) -> String {
    let body = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s*");
    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(words.first().and_then(|w| w.chars().next())) {
        r"\b"
    } else {
        ""
    };
    let trail = if is_word(words.last().and_then(|w| w.chars().last())) {
        r"\b"
    } else {
        ""
    };
    format!("{}{}{}", lead, body, trail)
}

/// The three-agent roster of the reference deployment: a triage agent and
/// two specialists.
pub fn default_agent_cards() -> Vec<AgentCard> {
    vec![
        AgentCard::new("triage", "Triage Agent")
            .with_description(
                "General purpose triage agent that can handle basic queries and route to specialized agents",
            )
            .can_handle("general_queries")
            .can_handle("routing")
            .can_handle("meta_requests")
            .with_alias(r"\bmain\s+agent\b")
            .with_alias(r"\bfirst\s+agent\b"),
        AgentCard::new("agent_a", "Agent A")
            .with_description("Specialized agent A")
            .can_handle("agent_a_specific_tasks")
            .cannot_handle("agent_b_specific_tasks")
            .with_short_name("A"),
        AgentCard::new("agent_b", "Agent B")
            .with_description("Specialized agent B")
            .can_handle("agent_b_specific_tasks")
            .cannot_handle("agent_a_specific_tasks")
            .with_short_name("B"),
    ]
}

/// What an agent produced for one dispatch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    pub tokens_used: Option<TokenUsage>,
    /// Textual results of the routing tools the agent invoked, in order.
    pub tool_results: Vec<String>,
}

impl AgentResponse {
    pub fn text(content: impl Into<String>) -> Self {
        AgentResponse {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// An opaque collaborator that turns a message into a reply.
///
/// Agents request routing changes through the [`TurnContext`]; they never
/// touch session state directly.
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    fn card(&self) -> &AgentCard;

    fn id(&self) -> &str {
        &self.card().id
    }

    fn name(&self) -> &str {
        &self.card().name
    }

    async fn respond(
        &mut self,
        message: &str,
        ctx: &mut TurnContext<'_>,
    ) -> HandoffResult<AgentResponse>;
}

/// Represents a parsed tool call from the LLM's response
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// Parse a tool call from the LLM's response.
///
/// Looks for a JSON fragment of the form
/// {"tool_call": {"name": "tool_name", "parameters": {...}}}
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start_idx = response.find("{\"tool_call\"")?;

    // Use brace-counting to find the matching closing brace
    let mut brace_count = 0;
    let mut end_idx = None;
    for (i, ch) in response[start_idx..].char_indices() {
        match ch {
            '{' => brace_count += 1,
            '}' => {
                brace_count -= 1;
                if brace_count == 0 {
                    end_idx = Some(start_idx + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let json_str = &response[start_idx..end_idx?];
    let parsed = serde_json::from_str::<serde_json::Value>(json_str).ok()?;
    let tool_call_obj = parsed.get("tool_call")?;
    let name = tool_call_obj.get("name").and_then(|v| v.as_str())?;
    let parameters = tool_call_obj
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall {
        name: name.to_string(),
        parameters,
    })
}

pub const MAX_TOOL_ITERATIONS: usize = 5;

/// A [`ConversationalAgent`] backed by an LLM.
pub struct LlmAgent {
    card: AgentCard,
    session: LLMSession,
    instructions: String,
    streaming: bool,
}

impl LlmAgent {
    pub fn new(card: AgentCard, client: Arc<dyn ClientWrapper>) -> Self {
        LlmAgent {
            card,
            session: LLMSession::new(client, String::new(), 8_192),
            instructions: String::new(),
            streaming: false,
        }
    }

    /// Free-form persona text placed at the top of the system prompt.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Use the client's streaming endpoint for every model call.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        let client = self.session.client().clone();
        self.session = LLMSession::new(client, String::new(), max_tokens);
        self
    }

    pub fn session(&self) -> &LLMSession {
        &self.session
    }

    fn system_prompt(&self, roster: Roster<'_>, handoffs_enabled: bool) -> String {
        let mut prompt = String::new();
        if !self.instructions.is_empty() {
            prompt.push_str(&self.instructions);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "You are {} ({}). {}\n{}\n",
            self.card.name,
            self.card.id,
            self.card.description,
            self.card.capability_summary()
        ));

        prompt.push_str("\nAgents in this conversation:\n");
        for card in roster.cards() {
            prompt.push_str(&format!("- {} ({}): {}\n", card.name, card.id, card.description));
        }

        prompt.push_str("\nYou have access to the following tools:\n");
        if handoffs_enabled {
            let specialists = roster
                .specialists()
                .map(|c| format!("'{}'", c.id))
                .collect::<Vec<_>>()
                .join(", ");
            prompt.push_str(&format!(
                "- handoff_to_agent: Hand the conversation to a specialist agent.\n  Parameters:\n    - agent_name (String): one of {}\n",
                specialists
            ));
            prompt.push_str(
                "- handoff_back_to_triage: Hand the conversation back to the triage agent.\n",
            );
            prompt.push_str(
                "- handle_multi_agent_request: Route a request that needs two agents.\n  Parameters:\n    - primary_agent (String)\n    - secondary_agent (String)\n    - primary_message (String)\n    - secondary_message (String)\n",
            );
        }
        prompt.push_str(
            "- clarify_ambiguous_request: Ask the user to choose between options.\n  Parameters:\n    - ambiguity_type (String)\n    - options (Array of String)\n",
        );
        prompt.push_str(
            "\nTo use a tool, respond with a JSON object in the following format:\n\
             {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
             After tool execution, I'll provide the result and you can continue.\n",
        );
        prompt
    }

    async fn call_model(&mut self, role: Role, content: String) -> HandoffResult<Message> {
        let reply = if self.streaming {
            self.session.send_message_stream(role, content).await?
        } else {
            self.session.send_message(role, content).await?
        };
        Ok(reply)
    }

    fn execute_tool(&self, call: &ToolCall, ctx: &mut TurnContext<'_>) -> String {
        let params = &call.parameters;
        match call.name.as_str() {
            "handoff_to_agent" => match str_param(params, "agent_name") {
                Ok(agent_name) => ctx.handoff_to_specialist(agent_name),
                Err(e) => e,
            },
            "handoff_back_to_triage" => ctx.handoff_back_to_triage(),
            "handle_multi_agent_request" => {
                let fields = (
                    str_param(params, "primary_agent"),
                    str_param(params, "secondary_agent"),
                    str_param(params, "primary_message"),
                    str_param(params, "secondary_message"),
                );
                match fields {
                    (Ok(primary), Ok(secondary), Ok(primary_msg), Ok(secondary_msg)) => {
                        ctx.request_multi_agent(primary, secondary, primary_msg, secondary_msg)
                    }
                    (Err(e), _, _, _) | (_, Err(e), _, _) | (_, _, Err(e), _) | (_, _, _, Err(e)) => e,
                }
            }
            "clarify_ambiguous_request" => {
                let kind = match str_param(params, "ambiguity_type") {
                    Ok(kind) => kind,
                    Err(e) => return e,
                };
                let options: Vec<String> = params
                    .get("options")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                ctx.request_clarification(kind, options)
            }
            other => format!("Error: Unknown tool '{}'", other),
        }
    }
}

fn str_param<'v>(params: &'v serde_json::Value, key: &str) -> Result<&'v str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Error: Missing parameter '{}'", key))
}

fn add_usage(total: &mut Option<TokenUsage>, usage: Option<TokenUsage>) {
    if let Some(usage) = usage {
        let total = total.get_or_insert_with(TokenUsage::default);
        total.input_tokens += usage.input_tokens;
        total.output_tokens += usage.output_tokens;
        total.total_tokens += usage.total_tokens;
    }
}

#[async_trait]
impl ConversationalAgent for LlmAgent {
    fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn respond(
        &mut self,
        message: &str,
        ctx: &mut TurnContext<'_>,
    ) -> HandoffResult<AgentResponse> {
        let prompt = self.system_prompt(ctx.roster(), ctx.handoffs_enabled());
        self.session.set_system_prompt(prompt);

        log::debug!(
            "{} calling {} (streaming: {})",
            self.card.id,
            self.session.client().model_name(),
            self.streaming
        );

        let mut tokens_used = None;
        let reply = self.call_model(Role::User, message.to_string()).await?;
        add_usage(&mut tokens_used, self.session.client().get_last_usage());

        let mut current_response = reply.content;
        let mut tool_results = Vec::new();
        let mut tool_iteration = 0;

        while let Some(tool_call) = parse_tool_call(&current_response) {
            if tool_iteration >= MAX_TOOL_ITERATIONS {
                log::warn!("{} reached the tool iteration limit", self.card.id);
                current_response = format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    current_response
                );
                break;
            }
            tool_iteration += 1;

            let result = self.execute_tool(&tool_call, ctx);
            log::info!("{} called {}: {}", self.card.id, tool_call.name, result);
            tool_results.push(result.clone());

            if ctx.handed_off() {
                // The receiving agent takes it from here.
                current_response = result;
                break;
            }

            let follow_up = self
                .call_model(
                    Role::User,
                    format!("Tool '{}' result: {}", tool_call.name, result),
                )
                .await?;
            add_usage(&mut tokens_used, self.session.client().get_last_usage());
            current_response = follow_up.content;
        }

        Ok(AgentResponse {
            content: current_response,
            tokens_used,
            tool_results,
        })
    }
}

/// What a [`ScriptedAgent`] does when one of its rules fires.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedAction {
    Reply(String),
    /// Request a handoff to `target`, then answer with `reply`.
    Handoff { target: String, reply: String },
    HandoffBackToTriage { reply: String },
    MultiAgent {
        primary: String,
        secondary: String,
        primary_message: String,
        secondary_message: String,
    },
    /// Ask the user to pick one of `options`; the reply is the tool result.
    Clarify { kind: String, options: Vec<String> },
}

/// Deterministic agent driven by substring rules.
///
/// Rules are checked in insertion order against the user's message for the
/// turn ([`TurnContext::user_message`]), case-insensitively. Everything the
/// agent receives is recorded and can be inspected through
/// [`ScriptedAgent::inbox`], even after the agent was moved into a registry.
pub struct ScriptedAgent {
    card: AgentCard,
    rules: Vec<(String, ScriptedAction)>,
    default_reply: String,
    inbox: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAgent {
    pub fn new(card: AgentCard) -> Self {
        let default_reply = format!("{} here. How can I help?", card.name);
        ScriptedAgent {
            card,
            rules: Vec::new(),
            default_reply,
            inbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on_contains(mut self, needle: impl Into<String>, action: ScriptedAction) -> Self {
        self.rules.push((needle.into().to_lowercase(), action));
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Shared handle to every message this agent has received.
    pub fn inbox(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.inbox)
    }
}

#[async_trait]
impl ConversationalAgent for ScriptedAgent {
    fn card(&self) -> &AgentCard {
        &self.card
    }

    async fn respond(
        &mut self,
        message: &str,
        ctx: &mut TurnContext<'_>,
    ) -> HandoffResult<AgentResponse> {
        if let Ok(mut inbox) = self.inbox.lock() {
            inbox.push(message.to_string());
        }

        let lowered = ctx.user_message().to_lowercase();
        let action = self
            .rules
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, action)| action.clone());

        let mut tool_results = Vec::new();
        let content = match action {
            None => self.default_reply.clone(),
            Some(ScriptedAction::Reply(reply)) => reply,
            Some(ScriptedAction::Handoff { target, reply }) => {
                tool_results.push(ctx.handoff(&target));
                reply
            }
            Some(ScriptedAction::HandoffBackToTriage { reply }) => {
                tool_results.push(ctx.handoff_back_to_triage());
                reply
            }
            Some(ScriptedAction::MultiAgent {
                primary,
                secondary,
                primary_message,
                secondary_message,
            }) => {
                let result =
                    ctx.request_multi_agent(&primary, &secondary, &primary_message, &secondary_message);
                tool_results.push(result.clone());
                result
            }
            Some(ScriptedAction::Clarify { kind, options }) => {
                let result = ctx.request_clarification(&kind, options);
                tool_results.push(result.clone());
                result
            }
        };

        Ok(AgentResponse {
            content,
            tokens_used: None,
            tool_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_call_embedded_in_prose() {
        let response = r#"Sure, one moment. {"tool_call": {"name": "handoff_to_agent", "parameters": {"agent_name": "agent_b"}}} Thanks!"#;
        let call = parse_tool_call(response).unwrap();
        assert_eq!(call.name, "handoff_to_agent");
        assert_eq!(call.parameters["agent_name"], "agent_b");
    }

    #[test]
    fn tool_call_after_multibyte_text_is_found() {
        let response = r#"Très bien, voilà: {"tool_call": {"name": "handoff_back_to_triage", "parameters": {}}}"#;
        let call = parse_tool_call(response).unwrap();
        assert_eq!(call.name, "handoff_back_to_triage");
    }

    #[test]
    fn unbalanced_tool_call_is_ignored() {
        assert!(parse_tool_call(r#"{"tool_call": {"name": "x""#).is_none());
        assert!(parse_tool_call("no tools here").is_none());
    }

    #[test]
    fn alias_patterns_cover_id_and_name() {
        let card = AgentCard::new("agent_a", "Agent A").with_alias(r"\bchef\b");
        assert_eq!(
            card.alias_patterns(),
            vec![
                r"\bagent_a\b".to_string(),
                r"\bAgent\s*A\b".to_string(),
                r"\bchef\b".to_string()
            ]
        );
    }

    #[test]
    fn short_name_needs_a_routing_word_outside_rules() {
        let card = AgentCard::new("agent_b", "Agent B").with_short_name("B");
        assert_eq!(card.alias_patterns().last().unwrap(), r"\b(?-i:B)\b");

        let reference = regex::Regex::new(&format!(
            "(?i){}",
            card.reference_patterns().last().unwrap()
        ))
        .unwrap();
        assert!(reference.is_match("connect me with B"));
        assert!(!reference.is_match("B is for breakfast"));
        assert!(!reference.is_match("talk to b"));
    }

    #[test]
    fn capability_summary_lists_both_sides() {
        let cards = default_agent_cards();
        let summary = cards[1].capability_summary();
        assert!(summary.contains("Can handle: agent_a_specific_tasks"));
        assert!(summary.contains("Cannot handle: agent_b_specific_tasks"));
    }
}
