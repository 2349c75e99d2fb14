//! Per-agent conversation memory.
//!
//! Each registered agent owns a [`ConversationMemory`]: an ordered list of
//! runs (one per dispatch) plus a cached summary. Summaries are produced by a
//! pluggable [`Summarizer`]:
//!
//! - [`ExtractiveSummarizer`]: deterministic, no model calls. The default.
//! - [`LlmSummarizer`]: asks a [`ClientWrapper`] to condense the transcript.
//!
//! [`ConversationMemory::update_summary`] is idempotent: when no run was
//! recorded since the last call it returns the cached summary without
//! consulting the summarizer again.

use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role};
use crate::orchestrator::handoff::HandoffResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Messages exchanged during one dispatch to an agent.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
}

/// Produces a textual summary from `(user, assistant)` message pairs.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        pairs: &[(Message, Message)],
        previous: Option<&str>,
    ) -> HandoffResult<String>;

    fn name(&self) -> &str;
}

pub struct ConversationMemory {
    runs: Vec<Run>,
    summarizer: Arc<dyn Summarizer>,
    cached: Option<(usize, String)>,
}

impl ConversationMemory {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        ConversationMemory {
            runs: Vec::new(),
            summarizer,
            cached: None,
        }
    }

    pub fn set_summarizer(&mut self, summarizer: Arc<dyn Summarizer>) {
        self.summarizer = summarizer;
        self.cached = None;
    }

    /// Records a single user/assistant exchange as one run.
    pub fn record(&mut self, user: &str, assistant: &str) {
        self.record_run(vec![
            Message::new(Role::User, user),
            Message::new(Role::Assistant, assistant),
        ]);
    }

    pub fn record_run(&mut self, messages: Vec<Message>) {
        self.runs.push(Run {
            messages,
            started_at: Utc::now(),
        });
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// One `(user, assistant)` pair per run: the last message with
    /// `user_role` and the last message whose role is in `assistant_roles`,
    /// both searched from the end of the run. Runs missing either side are
    /// skipped.
    pub fn message_pairs(&self, user_role: &Role, assistant_roles: &[Role]) -> Vec<(Message, Message)> {
        self.runs
            .iter()
            .filter_map(|run| {
                let user = run.messages.iter().rev().find(|m| &m.role == user_role)?;
                let assistant = run
                    .messages
                    .iter()
                    .rev()
                    .find(|m| assistant_roles.contains(&m.role))?;
                Some((user.clone(), assistant.clone()))
            })
            .collect()
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_response(&self) -> Option<&str> {
        self.runs
            .iter()
            .rev()
            .flat_map(|run| run.messages.iter().rev())
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.runs
            .iter()
            .rev()
            .flat_map(|run| run.messages.iter().rev())
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Refreshes the summary when runs were added since the last call.
    pub async fn update_summary(&mut self) -> HandoffResult<String> {
        if let Some((seen, summary)) = &self.cached {
            if *seen == self.runs.len() {
                return Ok(summary.clone());
            }
        }

        let pairs = self.message_pairs(&Role::User, &[Role::Assistant]);
        let previous = self.cached.as_ref().map(|(_, s)| s.as_str());
        let summary = self.summarizer.summarize(&pairs, previous).await?;
        log::debug!(
            "{} summarized {} exchange(s)",
            self.summarizer.name(),
            pairs.len()
        );
        self.cached = Some((self.runs.len(), summary.clone()));
        Ok(summary)
    }

    /// The cached summary, without refreshing it.
    pub fn summary(&self) -> Option<&str> {
        self.cached.as_ref().map(|(_, s)| s.as_str())
    }
}

/// Deterministic summarizer listing the most recent exchanges.
#[derive(Clone, Debug)]
pub struct ExtractiveSummarizer {
    /// How many of the latest exchanges to include.
    pub max_pairs: usize,
    /// Per-message preview length, in characters.
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        ExtractiveSummarizer {
            max_pairs: 5,
            max_chars: 200,
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        pairs: &[(Message, Message)],
        _previous: Option<&str>,
    ) -> HandoffResult<String> {
        if pairs.is_empty() {
            return Ok("No conversation yet.".to_string());
        }

        let mut summary = format!(
            "Conversation with {} exchange{}:",
            pairs.len(),
            if pairs.len() == 1 { "" } else { "s" }
        );
        let skip = pairs.len().saturating_sub(self.max_pairs);
        for (user, assistant) in &pairs[skip..] {
            summary.push_str(&format!(
                "\n- User: {}\n  Agent: {}",
                preview(&user.content, self.max_chars),
                preview(&assistant.content, self.max_chars)
            ));
        }
        Ok(summary)
    }

    fn name(&self) -> &str {
        "extractive"
    }
}

/// Truncates `text` to at most `max_chars` characters, never splitting a
/// character, and flattens newlines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Asks an LLM to condense the transcript.
pub struct LlmSummarizer {
    client: Arc<dyn ClientWrapper>,
    instructions: String,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        LlmSummarizer {
            client,
            instructions: "\
You are summarizing a conversation between a user and an assistant so another \
assistant can take over. Write a concise summary covering:\n\
1. What the user asked for\n\
2. What the assistant answered or decided\n\
3. Anything still open\n\
Be concise but preserve all critical information."
                .to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        pairs: &[(Message, Message)],
        previous: Option<&str>,
    ) -> HandoffResult<String> {
        if pairs.is_empty() {
            return Ok("No conversation yet.".to_string());
        }

        let mut transcript = String::new();
        if let Some(previous) = previous {
            transcript.push_str(&format!("Earlier summary:\n{}\n\n", previous));
        }
        for (user, assistant) in pairs {
            transcript.push_str(&format!(
                "User: {}\nAssistant: {}\n",
                user.content, assistant.content
            ));
        }

        let request = vec![
            Message::new(Role::System, self.instructions.clone()),
            Message::new(Role::User, transcript),
        ];
        let response = self.client.send_message(&request).await?;
        Ok(response.content.trim().to_string())
    }

    fn name(&self) -> &str {
        self.client.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll...");
        assert_eq!(preview("short\ntext", 50), "short text");
    }

    #[test]
    fn message_pairs_take_last_of_each_role() {
        let mut memory = ConversationMemory::new(Arc::new(ExtractiveSummarizer::default()));
        memory.record_run(vec![
            Message::new(Role::User, "first question"),
            Message::new(Role::Assistant, "thinking"),
            Message::new(Role::User, "second question"),
            Message::new(Role::Assistant, "final answer"),
        ]);
        memory.record_run(vec![Message::new(Role::User, "no reply")]);

        let pairs = memory.message_pairs(&Role::User, &[Role::Assistant]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.content, "second question");
        assert_eq!(pairs[0].1.content, "final answer");
        assert_eq!(memory.last_response(), Some("final answer"));
        assert_eq!(memory.last_user_message(), Some("no reply"));
    }
}
