//! Intent classification for incoming user messages.
//!
//! [`IntentParser`] compiles one ordered rule table from the registered
//! [`AgentCard`]s and classifies each message into a [`RequestType`],
//! collecting the agents it mentions, the handoffs it asks for and any
//! meta-requests ("tell Agent B ...", "what did Agent A say?").
//!
//! Parsing is pure: the same message against the same cards always yields the
//! same [`ParsedIntent`].
//!
//! ```rust
//! use handoff_orchestrator::{default_agent_cards, IntentParser, RequestType};
//!
//! let parser = IntentParser::new(&default_agent_cards()).unwrap();
//! let intent = parser.parse("I want to talk to Agent A");
//! assert_eq!(intent.kind, RequestType::AgentRequest);
//! assert_eq!(intent.agent_references, vec!["agent_a".to_string()]);
//! ```

use crate::orchestrator::agent::AgentCard;
use crate::orchestrator::registry::RegistryError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pseudo-reference standing for whichever agent held the conversation
/// before the most recent handoff.
pub const PREVIOUS_REFERENCE: &str = "previous";

const PREVIOUS_ALIASES: &[&str] = &[r"previous\s+agent", r"last\s+agent", r"other\s+agent"];

lazy_static! {
    static ref SEGMENT_SPLIT: Regex =
        Regex::new(r"(?i)[.!?]+\s+|;\s*|,?\s+(?:and\s+)?then\s+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    GeneralQuery,
    AgentRequest,
    MetaRequest,
    MultiIntent,
}

/// A matched handoff rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandoffMatch {
    pub rule: String,
    pub text: String,
    /// Agent id, [`PREVIOUS_REFERENCE`], or `None` when the captured name
    /// could not be tied to an agent.
    pub target: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaKind {
    /// "tell Agent B ...", "ask Agent B to ..."
    Relay,
    /// "what did Agent A say?"
    Recall,
    /// "who handled my question?"
    Audit,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaRequest {
    pub kind: MetaKind,
    pub rule: String,
    pub text: String,
    pub target: Option<String>,
}

/// Result of [`IntentParser::parse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    #[serde(rename = "type")]
    pub kind: RequestType,
    /// Agent ids (or [`PREVIOUS_REFERENCE`]) in order of first appearance.
    pub agent_references: Vec<String>,
    pub handoff_requests: Vec<HandoffMatch>,
    pub meta_requests: Vec<MetaRequest>,
    pub clarification_needed: bool,
    pub original_message: String,
    /// Routable segments of a [`RequestType::MultiIntent`] message, in order.
    pub sub_intents: Vec<ParsedIntent>,
}

impl ParsedIntent {
    /// Target of the first handoff match, falling back to the first reference.
    pub fn primary_target(&self) -> Option<&str> {
        self.handoff_requests
            .iter()
            .find_map(|h| h.target.as_deref())
            .or_else(|| self.agent_references.first().map(|s| s.as_str()))
    }

    pub fn is_routable(&self) -> bool {
        self.kind != RequestType::GeneralQuery
    }

    pub fn meta(&self, kind: MetaKind) -> Option<&MetaRequest> {
        self.meta_requests.iter().find(|m| m.kind == kind)
    }
}

#[derive(Clone, Copy, Debug)]
enum RuleEffect {
    /// Handoff rule; `default_target` applies when the target group did not participate.
    Handoff { default_target: Option<&'static str> },
    Meta(MetaKind),
}

struct IntentRule {
    name: &'static str,
    effect: RuleEffect,
    regex: Regex,
}

struct ReferencePattern {
    id: String,
    /// Finds references anywhere in a message.
    regex: Regex,
    /// Matches text a rule already captured as a target.
    target: Regex,
}

/// Compiled rule table for one set of agents.
pub struct IntentParser {
    references: Vec<ReferencePattern>,
    go_back: Regex,
    rules: Vec<IntentRule>,
}

impl IntentParser {
    /// Compiles the alias and rule tables for `cards`.
    ///
    /// Fails with [`RegistryError::InvalidAlias`] when a custom alias is not a
    /// valid regex fragment.
    pub fn new(cards: &[AgentCard]) -> Result<Self, RegistryError> {
        let mut references = Vec::with_capacity(cards.len() + 1);
        let mut fragments = Vec::new();

        for card in cards {
            let aliases = card.alias_patterns();
            for alias in &aliases {
                Regex::new(alias).map_err(|e| RegistryError::InvalidAlias {
                    agent: card.id.clone(),
                    pattern: alias.clone(),
                    reason: e.to_string(),
                })?;
            }
            references.push(ReferencePattern {
                id: card.id.clone(),
                regex: compile(
                    &format!("(?i){}", alternation(&card.reference_patterns())),
                    &card.id,
                )?,
                target: compile(&format!("(?i){}", alternation(&aliases)), &card.id)?,
            });
            fragments.extend(aliases);
        }

        let previous: Vec<String> = PREVIOUS_ALIASES.iter().map(|s| s.to_string()).collect();
        let previous_regex =
            compile(&format!("(?i){}", alternation(&previous)), PREVIOUS_REFERENCE)?;
        references.push(ReferencePattern {
            id: PREVIOUS_REFERENCE.to_string(),
            regex: previous_regex.clone(),
            target: previous_regex,
        });
        fragments.extend(previous);

        let alts = alternation(&fragments);
        // Handoff rules first, meta rules after: a message matching both is a meta-request.
        let table: Vec<(&'static str, RuleEffect, String)> = vec![
            (
                "direct_handoff",
                RuleEffect::Handoff { default_target: None },
                format!(
                    r"(?i)\b(?:connect|switch|transfer|hand\s*(?:me\s+)?(?:off|over)|talk|speak|ask|chat)\s+(?:me\s+)?(?:back\s+)?(?:(?:to|with)\s+)?(?:the\s+)?(?P<target>{})",
                    alts
                ),
            ),
            (
                "return_handoff",
                RuleEffect::Handoff { default_target: Some(PREVIOUS_REFERENCE) },
                format!(
                    r"(?i)\b(?:go|switch|take\s+me)\s+back\b(?:\s+to\s+(?:the\s+)?(?P<target>{}))?",
                    alts
                ),
            ),
            (
                "relay_tell",
                RuleEffect::Meta(MetaKind::Relay),
                format!(r"(?i)\btell\s+(?:the\s+)?(?P<target>{})", alts),
            ),
            (
                "relay_ask",
                RuleEffect::Meta(MetaKind::Relay),
                format!(
                    r"(?i)(?P<head>\bask\s+(?:the\s+)?(?P<target>{}))\s+(?:to|if|whether|for|what|why|how|when|where|who)\b",
                    alts
                ),
            ),
            (
                "recall",
                RuleEffect::Meta(MetaKind::Recall),
                format!(
                    r"(?i)\bwhat\s+did\s+(?:the\s+)?(?P<target>{})\s+(?:say|think|tell|mention|suggest|recommend)",
                    alts
                ),
            ),
            (
                "audit",
                RuleEffect::Meta(MetaKind::Audit),
                r"(?i)\bwho\s+(?:handled|answered|responded)".to_string(),
            ),
        ];

        let mut rules = Vec::with_capacity(table.len());
        for (name, effect, pattern) in table {
            rules.push(IntentRule {
                name,
                effect,
                regex: compile(&pattern, name)?,
            });
        }

        Ok(IntentParser {
            references,
            go_back: compile(r"(?i)\bgo\s+back\b", PREVIOUS_REFERENCE)?,
            rules,
        })
    }

    /// Classifies `message`.
    pub fn parse(&self, message: &str) -> ParsedIntent {
        let mut intent = self.classify(message);

        let segments: Vec<&str> = SEGMENT_SPLIT
            .split(message)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if segments.len() > 1 {
            // Each segment contains no separator, so the recursion stops one level down.
            let routable: Vec<ParsedIntent> = segments
                .into_iter()
                .map(|segment| self.parse(segment))
                .filter(|sub| sub.is_routable())
                .collect();
            if routable.len() >= 2 {
                intent.kind = RequestType::MultiIntent;
                intent.sub_intents = routable;
            }
        }

        log::debug!(
            "Parsed intent {:?} with references {:?}",
            intent.kind,
            intent.agent_references
        );
        intent
    }

    /// Single-segment classification, without multi-intent splitting.
    fn classify(&self, message: &str) -> ParsedIntent {
        let mut positions: Vec<(usize, String)> = Vec::new();
        for reference in &self.references {
            if let Some(m) = reference.regex.find(message) {
                positions.push((m.start(), reference.id.clone()));
            }
        }

        let mut handoff_requests = Vec::new();
        let mut meta_requests = Vec::new();
        let mut kind = RequestType::GeneralQuery;

        for rule in &self.rules {
            let caps = match rule.regex.captures(message) {
                Some(caps) => caps,
                None => continue,
            };
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let text = caps.name("head").map(|m| m.as_str()).unwrap_or(whole);
            let captured = caps.name("target").map(|m| m.as_str());

            match rule.effect {
                RuleEffect::Handoff { default_target } => {
                    let target = match captured {
                        Some(name) => self.resolve_name(name),
                        None => default_target.map(|t| t.to_string()),
                    };
                    if captured.is_none() && default_target == Some(PREVIOUS_REFERENCE) {
                        // A bare "go back" points at the previous agent.
                        if let Some(m) = self.go_back.find(message) {
                            positions.push((m.start(), PREVIOUS_REFERENCE.to_string()));
                        }
                    }
                    handoff_requests.push(HandoffMatch {
                        rule: rule.name.to_string(),
                        text: text.to_string(),
                        target,
                    });
                    kind = RequestType::AgentRequest;
                }
                RuleEffect::Meta(meta_kind) => {
                    meta_requests.push(MetaRequest {
                        kind: meta_kind,
                        rule: rule.name.to_string(),
                        text: text.to_string(),
                        target: captured.and_then(|name| self.resolve_name(name)),
                    });
                    kind = RequestType::MetaRequest;
                }
            }
        }

        positions.sort_by_key(|(pos, _)| *pos);
        let mut agent_references: Vec<String> = Vec::with_capacity(positions.len());
        for (_, id) in positions {
            if !agent_references.contains(&id) {
                agent_references.push(id);
            }
        }

        let clarification_needed = agent_references.len() > 1
            && agent_references.iter().any(|r| r == PREVIOUS_REFERENCE);

        ParsedIntent {
            kind,
            agent_references,
            handoff_requests,
            meta_requests,
            clarification_needed,
            original_message: message.to_string(),
            sub_intents: Vec::new(),
        }
    }

    /// Maps captured alias text back to the agent (or previous) it names.
    fn resolve_name(&self, name: &str) -> Option<String> {
        self.references
            .iter()
            .find(|r| r.target.is_match(name))
            .map(|r| r.id.clone())
    }
}

/// Removes `matched` from `message` and collapses the remaining whitespace.
pub fn strip_match(message: &str, matched: &str) -> String {
    let stripped = message.replacen(matched, " ", 1);
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn alternation(fragments: &[String]) -> String {
    fragments
        .iter()
        .map(|f| format!("(?:{})", f))
        .collect::<Vec<_>>()
        .join("|")
}

fn compile(pattern: &str, owner: &str) -> Result<Regex, RegistryError> {
    Regex::new(pattern).map_err(|e| RegistryError::InvalidAlias {
        agent: owner.to_string(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::agent::default_agent_cards;

    fn parser() -> IntentParser {
        IntentParser::new(&default_agent_cards()).unwrap()
    }

    #[test]
    fn article_a_is_not_an_agent_reference() {
        let intent = parser().parse("I have a question about the weather");
        assert_eq!(intent.kind, RequestType::GeneralQuery);
        assert!(intent.agent_references.is_empty());
    }

    #[test]
    fn bare_go_back_targets_previous() {
        let intent = parser().parse("Can we go back?");
        assert_eq!(intent.kind, RequestType::AgentRequest);
        assert_eq!(intent.agent_references, vec![PREVIOUS_REFERENCE.to_string()]);
        assert_eq!(intent.primary_target(), Some(PREVIOUS_REFERENCE));
    }

    #[test]
    fn go_back_to_named_agent_needs_no_clarification() {
        let intent = parser().parse("go back to Agent A");
        assert_eq!(intent.primary_target(), Some("agent_a"));
        assert!(!intent.clarification_needed);
    }

    #[test]
    fn relay_ask_keeps_the_question_word() {
        let intent = parser().parse("ask Agent B whether it will rain");
        let meta = intent.meta(MetaKind::Relay).unwrap();
        assert_eq!(meta.text, "ask Agent B");
        assert_eq!(strip_match(&intent.original_message, &meta.text), "whether it will rain");
    }

    #[test]
    fn invalid_alias_is_rejected() {
        let cards = vec![AgentCard::new("triage", "Triage").with_alias("(unclosed")];
        assert!(matches!(
            IntentParser::new(&cards),
            Err(RegistryError::InvalidAlias { .. })
        ));
    }
}
