//! Fixed mapping from agent id to agent plus that agent's conversation memory.

use crate::orchestrator::agent::{AgentCard, ConversationalAgent};
use crate::orchestrator::memory::{ConversationMemory, ExtractiveSummarizer, Summarizer};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicateAgent(String),
    UnknownAgent(String),
    InvalidAlias {
        agent: String,
        pattern: String,
        reason: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateAgent(id) => write!(f, "Agent '{}' is already registered", id),
            RegistryError::UnknownAgent(id) => write!(f, "Agent '{}' is not registered", id),
            RegistryError::InvalidAlias {
                agent,
                pattern,
                reason,
            } => write!(
                f,
                "Invalid alias pattern '{}' for agent '{}': {}",
                pattern, agent, reason
            ),
        }
    }
}

impl Error for RegistryError {}

/// An agent together with its transcript.
pub struct RegisteredAgent {
    pub agent: Box<dyn ConversationalAgent>,
    pub memory: ConversationMemory,
}

/// Read-only view of the registered agents, handed to agents during dispatch.
#[derive(Clone, Copy)]
pub struct Roster<'a> {
    cards: &'a [AgentCard],
    triage_id: &'a str,
}

impl<'a> Roster<'a> {
    pub fn new(cards: &'a [AgentCard], triage_id: &'a str) -> Self {
        Roster { cards, triage_id }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cards.iter().any(|c| c.id == id)
    }

    pub fn card(&self, id: &str) -> Option<&'a AgentCard> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// Display name for `id`, falling back to the id itself.
    pub fn name(&self, id: &str) -> String {
        self.card(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn ids(&self) -> Vec<&'a str> {
        self.cards.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn cards(&self) -> &'a [AgentCard] {
        self.cards
    }

    pub fn triage_id(&self) -> &'a str {
        self.triage_id
    }

    /// Every agent except the triage agent, in registration order.
    pub fn specialists(&self) -> impl Iterator<Item = &'a AgentCard> + 'a {
        let triage_id = self.triage_id;
        self.cards.iter().filter(move |c| c.id != triage_id)
    }
}

/// Registry of the agents taking part in one conversation.
///
/// The agent set is fixed for the registry's lifetime once the controller
/// takes ownership of it; cards are kept in registration order.
pub struct AgentRegistry {
    entries: HashMap<String, RegisteredAgent>,
    cards: Vec<AgentCard>,
    triage_id: String,
    summarizer: Arc<dyn Summarizer>,
}

impl AgentRegistry {
    /// Creates a registry whose triage agent is `triage`.
    pub fn new(triage: Box<dyn ConversationalAgent>) -> Self {
        let summarizer: Arc<dyn Summarizer> = Arc::new(ExtractiveSummarizer::default());
        let card = triage.card().clone();
        let triage_id = card.id.clone();
        let mut entries = HashMap::new();
        entries.insert(
            triage_id.clone(),
            RegisteredAgent {
                agent: triage,
                memory: ConversationMemory::new(Arc::clone(&summarizer)),
            },
        );
        AgentRegistry {
            entries,
            cards: vec![card],
            triage_id,
            summarizer,
        }
    }

    /// Summarizer for every agent memory, current and future.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        for entry in self.entries.values_mut() {
            entry.memory.set_summarizer(Arc::clone(&summarizer));
        }
        self.summarizer = summarizer;
        self
    }

    pub fn register(&mut self, agent: Box<dyn ConversationalAgent>) -> Result<(), RegistryError> {
        let card = agent.card().clone();
        if self.entries.contains_key(&card.id) {
            return Err(RegistryError::DuplicateAgent(card.id));
        }
        log::info!("Registered agent {} ({})", card.id, card.name);
        self.entries.insert(
            card.id.clone(),
            RegisteredAgent {
                agent,
                memory: ConversationMemory::new(Arc::clone(&self.summarizer)),
            },
        );
        self.cards.push(card);
        Ok(())
    }

    /// Builder form of [`register`](AgentRegistry::register).
    pub fn with_agent(mut self, agent: Box<dyn ConversationalAgent>) -> Result<Self, RegistryError> {
        self.register(agent)?;
        Ok(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn card(&self, id: &str) -> Option<&AgentCard> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn cards(&self) -> &[AgentCard] {
        &self.cards
    }

    pub fn triage_id(&self) -> &str {
        &self.triage_id
    }

    pub fn ids(&self) -> Vec<&str> {
        self.cards.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn roster(&self) -> Roster<'_> {
        Roster::new(&self.cards, &self.triage_id)
    }

    pub fn memory(&self, id: &str) -> Option<&ConversationMemory> {
        self.entries.get(id).map(|e| &e.memory)
    }

    pub fn memory_mut(&mut self, id: &str) -> Option<&mut ConversationMemory> {
        self.entries.get_mut(id).map(|e| &mut e.memory)
    }

    /// Mutable access to one agent alongside a view of the whole roster.
    pub(crate) fn checkout(&mut self, id: &str) -> Option<(&mut RegisteredAgent, Roster<'_>)> {
        let roster = Roster::new(&self.cards, &self.triage_id);
        self.entries.get_mut(id).map(|entry| (entry, roster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::agent::{default_agent_cards, ScriptedAgent};

    fn registry() -> AgentRegistry {
        let mut cards = default_agent_cards().into_iter();
        let mut registry = AgentRegistry::new(Box::new(ScriptedAgent::new(cards.next().unwrap())));
        for card in cards {
            registry.register(Box::new(ScriptedAgent::new(card))).unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Box::new(ScriptedAgent::new(AgentCard::new("agent_a", "Again"))))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAgent("agent_a".into()));
        assert_eq!(registry.ids(), vec!["triage", "agent_a", "agent_b"]);
    }

    #[test]
    fn roster_separates_specialists() {
        let registry = registry();
        let roster = registry.roster();
        let specialists: Vec<&str> = roster.specialists().map(|c| c.id.as_str()).collect();
        assert_eq!(specialists, vec!["agent_a", "agent_b"]);
        assert_eq!(roster.name("agent_b"), "Agent B");
        assert!(!roster.contains("agent_c"));
    }
}
