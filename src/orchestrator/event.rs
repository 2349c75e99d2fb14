//! Handoff event system.
//!
//! Provides a callback-based observability layer for the
//! [`HandoffController`](crate::HandoffController). Implement
//! [`EventHandler`] to receive real-time notifications about:
//!
//! - **Turn lifecycle**: start and end of every processed user message
//! - **Routing**: completed and rejected handoffs, deferred sub-intents,
//!   the chain limit being hit
//! - **Dispatch**: every agent invocation and whether its reply was surfaced
//! - **Meta-requests**: relays and clarification requests
//!
//! The single method has a default no-op implementation, so you only
//! override what you care about. Register the handler with
//! [`HandoffController::with_event_handler`](crate::HandoffController::with_event_handler).
//!
//! # Example
//!
//! ```rust,no_run
//! use handoff_orchestrator::{EventHandler, HandoffEvent};
//! use async_trait::async_trait;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl EventHandler for PrintHandler {
//!     async fn on_handoff_event(&self, event: &HandoffEvent) {
//!         match event {
//!             HandoffEvent::HandoffCompleted { from, to, .. } => {
//!                 println!("{} -> {}", from, to);
//!             }
//!             HandoffEvent::AgentResponded { agent_id, surfaced, .. } => {
//!                 println!("{} answered (shown to user: {})", agent_id, surfaced);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use crate::orchestrator::intent::RequestType;
use async_trait::async_trait;

/// Events emitted by a [`HandoffController`](crate::HandoffController) while
/// it processes a turn.
///
/// # Event Flow (a turn with one handoff)
///
/// ```text
/// TurnStarted
///   └─ AgentDispatched { pass: 0 }
///   └─ HandoffCompleted
///   └─ AgentResponded { surfaced: false }
///   └─ AgentDispatched { pass: 1 }
///   └─ AgentResponded { surfaced: true }
/// TurnCompleted
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffEvent {
    /// A user message was received and classified.
    TurnStarted {
        session_id: String,
        current_agent: String,
        request_type: RequestType,
        message_preview: String,
    },

    /// The message referenced the previous agent alongside another agent.
    ClarificationRequested {
        session_id: String,
        agent_id: String,
        references: Vec<String>,
    },

    /// Ownership of the conversation moved.
    HandoffCompleted {
        session_id: String,
        from: String,
        to: String,
    },

    /// A handoff was requested but refused; `reason` is the textual error
    /// returned to the requester.
    HandoffRejected {
        session_id: String,
        target: String,
        reason: String,
    },

    /// Sub-intents of a multi-intent message were queued for later passes.
    IntentsDeferred {
        session_id: String,
        count: usize,
    },

    /// An agent is about to be invoked. `pass` is 0 for the first dispatch of
    /// the turn and increases with every chained handoff.
    AgentDispatched {
        session_id: String,
        agent_id: String,
        pass: usize,
    },

    /// An agent replied. `surfaced` is false when the reply was superseded by
    /// a handoff in the same pass.
    AgentResponded {
        session_id: String,
        agent_id: String,
        pass: usize,
        surfaced: bool,
        response_length: usize,
    },

    /// A message was relayed to `target` without changing the current agent.
    RelayCompleted {
        session_id: String,
        from: String,
        target: String,
    },

    /// The turn needed more chained passes than allowed.
    ChainLimitReached {
        session_id: String,
        limit: usize,
    },

    /// Processing of the user message finished.
    TurnCompleted {
        session_id: String,
        current_agent: String,
        handoffs: usize,
        replies: usize,
    },
}

/// Receives [`HandoffEvent`]s.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event emitted by the controller.
    ///
    /// The default implementation is a no-op.
    async fn on_handoff_event(&self, _event: &HandoffEvent) {}
}
