//! # handoff-orchestrator
//!
//! Routes a conversation across a triage agent and a set of specialist agents.
//! The crate decides, turn by turn, which agent answers the user, moves the
//! conversation between agents when asked to, and carries enough context
//! across each move that the receiving agent can continue coherently.
//!
//! The crate provides layered abstractions for:
//!
//! * **Intent parsing**: [`IntentParser`] classifies a user message as a
//!   general query, an agent request, a meta-request or a multi-intent
//!   message, and extracts the agents it refers to.
//! * **Handoff control**: [`HandoffController`] owns the per-conversation
//!   [`SessionState`], enforces one handoff per pass, follows chained handoffs
//!   and surfaces only the reply of the agent the turn settles on.
//! * **Context propagation**: every receiving agent gets a structured payload
//!   with the previous agent's summary, the handoff history and the user's
//!   latest message.
//! * **Relays and recalls**: "tell Agent B ..." and "what did Agent A say?"
//!   are answered without moving the conversation.
//! * **Agents**: the [`ConversationalAgent`] trait, an LLM-backed
//!   [`LlmAgent`] speaking through any [`ClientWrapper`], and a deterministic
//!   [`ScriptedAgent`] for tests and offline demos.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use handoff_orchestrator::{
//!     default_agent_cards, AgentRegistry, HandoffConfig, HandoffController, ScriptedAgent,
//!     ScriptedAction,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     handoff_orchestrator::init_logger();
//!
//!     let mut cards = default_agent_cards().into_iter();
//!     let triage = ScriptedAgent::new(cards.next().unwrap()).on_contains(
//!         "cooking",
//!         ScriptedAction::Handoff {
//!             target: "agent_a".into(),
//!             reply: "Agent A knows cooking.".into(),
//!         },
//!     );
//!     let mut registry = AgentRegistry::new(Box::new(triage));
//!     for card in cards {
//!         registry.register(Box::new(ScriptedAgent::new(card)))?;
//!     }
//!
//!     let mut controller = HandoffController::new(registry, HandoffConfig::default())?;
//!     for message in ["Hi there", "I have a cooking question", "What did you say?"].iter() {
//!         let outcome = controller.process(message).await?;
//!         for reply in &outcome.replies {
//!             println!("{}: {}", reply.agent_name, reply.content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding the orchestrator opt in to `RUST_LOG` driven
/// diagnostics by calling this once at startup.
///
/// ```rust
/// handoff_orchestrator::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `orchestrator` module.
pub mod orchestrator;

// Re-exporting key items for easier external access.
pub use orchestrator::agent::{
    default_agent_cards, parse_tool_call, AgentCard, AgentResponse, ConversationalAgent, LlmAgent,
    ScriptedAction, ScriptedAgent, ToolCall,
};
pub use orchestrator::client_wrapper;
pub use orchestrator::client_wrapper::{
    ClientWrapper, Message, MessageChunk, MessageChunkStream, Role, SendError, TokenUsage,
};
pub use orchestrator::config::HandoffConfig;
pub use orchestrator::context::{build_handoff_payload, HandoffPayload};
pub use orchestrator::event;
pub use orchestrator::event::{EventHandler, HandoffEvent};
pub use orchestrator::handoff::{
    AgentReply, HandoffController, HandoffError, HandoffResult, NoopSink, ReplyKind, ReplySink,
    TurnContext, TurnOutcome, ROUTING_FALLBACK,
};
pub use orchestrator::intent::{
    HandoffMatch, IntentParser, MetaKind, MetaRequest, ParsedIntent, RequestType,
    PREVIOUS_REFERENCE,
};
pub use orchestrator::llm_session::LLMSession;
pub use orchestrator::memory::{
    ConversationMemory, ExtractiveSummarizer, LlmSummarizer, Summarizer,
};
pub use orchestrator::reference::resolve as resolve_reference;
pub use orchestrator::registry::{AgentRegistry, RegisteredAgent, RegistryError, Roster};
pub use orchestrator::relay::relay_message;
pub use orchestrator::session::{
    AgentTarget, ClarificationRequest, ConversationContext, HandoffRecord, MultiAgentRequest,
    SessionState, SummarySnapshot,
};
pub use orchestrator::store::{InMemorySessionStore, SessionStore};
