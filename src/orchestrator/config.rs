//! Configuration for the handoff controller.
//!
//! Provides the [`HandoffConfig`] struct. Users construct this manually; no
//! file parsing dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use handoff_orchestrator::HandoffConfig;
//!
//! // Use the defaults
//! let config = HandoffConfig::default();
//! assert_eq!(config.max_handoff_chain, 5);
//!
//! // Or tighten the chain and skip the routing blocks
//! let config = HandoffConfig {
//!     max_handoff_chain: 2,
//!     include_routing_context: false,
//!     ..HandoffConfig::default()
//! };
//! ```

/// Tunables for one [`HandoffController`](crate::HandoffController).
#[derive(Clone, Debug, PartialEq)]
pub struct HandoffConfig {
    /// Maximum number of follow-up passes a single turn may take after
    /// handoffs. Exceeding it surfaces a routing fallback reply.
    pub max_handoff_chain: usize,
    /// Append `<conversation_context>` and `<handoff_history>` blocks to the
    /// message dispatched to the current agent.
    pub include_routing_context: bool,
    /// Length, in characters, of message previews in log lines and events.
    pub message_preview_chars: usize,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_handoff_chain: 5,
            include_routing_context: true,
            message_preview_chars: 120,
        }
    }
}
