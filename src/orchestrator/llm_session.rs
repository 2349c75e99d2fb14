//! The `llm_session` module manages the rolling conversation an [`LlmAgent`](crate::LlmAgent)
//! keeps with its model, handling message history, context pruning, and
//! token accounting.
//!
//! **Key features:**
//! - **Automatic context trimming**: never exceed your `max_tokens` window.
//! - **Token tracking**: records `input_tokens` & `output_tokens` reported by the client.
//! - **Streaming**: [`LLMSession::send_message_stream`] consumes a client stream to
//!   completion and stores the assembled reply like any other turn.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use handoff_orchestrator::{ClientWrapper, LLMSession, Role};
//!
//! # async fn demo(client: Arc<dyn ClientWrapper>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let mut session = LLMSession::new(client, "You are Agent A.".into(), 8_192);
//! let reply = session.send_message(Role::User, "Hello!".into()).await?;
//! println!("Assistant: {}", reply.content);
//! println!("Tokens used: {:?}", session.token_usage());
//! # Ok(())
//! # }
//! ```

use crate::orchestrator::client_wrapper::{ClientWrapper, Message, Role, SendError, TokenUsage};
use futures_util::StreamExt;
use std::sync::Arc;

/// A conversation session with an LLM, including:
///
/// - `client`: your `ClientWrapper`.
/// - `system_prompt`: the context-steering system message.
/// - `conversation_history`: all user, tool & assistant messages (excluding system prompt).
/// - `max_tokens`: your configured context window size.
/// - `total_input_tokens` / `total_output_tokens` / `total_token_count`: usage
///   reported for the last call.
pub struct LLMSession {
    client: Arc<dyn ClientWrapper>,
    system_prompt: Message,
    conversation_history: Vec<Message>,
    max_tokens: usize,
    total_input_tokens: usize,
    total_output_tokens: usize,
    total_token_count: usize,
}

impl LLMSession {
    /// Creates a new `LLMSession` with the given client and system prompt.
    pub fn new(client: Arc<dyn ClientWrapper>, system_prompt: String, max_tokens: usize) -> Self {
        LLMSession {
            client,
            system_prompt: Message::new(Role::System, system_prompt),
            conversation_history: Vec::new(),
            max_tokens,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_token_count: 0,
        }
    }

    /// Sends a message, receives the assistant's reply, and automatically:
    /// 1. Adds the message to history
    /// 2. Calls into your client's `send_message(...)` with the system prompt prepended
    /// 3. Pulls real token usage via `client.get_last_usage()`
    /// 4. Prunes oldest messages if the reported total exceeds `max_tokens`
    ///
    /// Returns the assistant's `Message`.
    pub async fn send_message(&mut self, role: Role, content: String) -> Result<Message, SendError> {
        self.conversation_history.push(Message::new(role, content));

        let request = self.request_messages();
        let response = self.client.send_message(&request).await?;

        self.record_usage_and_trim();
        self.conversation_history.push(response.clone());
        Ok(response)
    }

    /// Same as [`send_message`](LLMSession::send_message) but uses the client's
    /// streaming endpoint. The stream is consumed to completion before the
    /// assembled reply is stored and returned.
    pub async fn send_message_stream(
        &mut self,
        role: Role,
        content: String,
    ) -> Result<Message, SendError> {
        self.conversation_history.push(Message::new(role, content));

        let request = self.request_messages();
        let mut stream = self.client.send_message_stream(&request).await?;

        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            assembled.push_str(&chunk.content);
            if chunk.is_final {
                break;
            }
        }

        self.record_usage_and_trim();
        let response = Message::new(Role::Assistant, assembled);
        self.conversation_history.push(response.clone());
        Ok(response)
    }

    fn request_messages(&self) -> Vec<Message> {
        let mut request = Vec::with_capacity(self.conversation_history.len() + 1);
        request.push(self.system_prompt.clone());
        request.extend(self.conversation_history.iter().cloned());
        request
    }

    fn record_usage_and_trim(&mut self) {
        if let Some(usage) = self.client.get_last_usage() {
            self.total_input_tokens = usage.input_tokens;
            self.total_output_tokens = usage.output_tokens;
            self.total_token_count = usage.total_tokens;

            if self.total_token_count > self.max_tokens {
                // How many tokens we're over by
                let mut excess = self.total_token_count - self.max_tokens;

                // Remove the oldest messages until we've cleared at least `excess` tokens
                while excess > 0 && !self.conversation_history.is_empty() {
                    let msg = self.conversation_history.remove(0);
                    let removed = estimate_message_token_count(&msg);
                    excess = excess.saturating_sub(removed);
                }
            }
        }
    }

    /// Sets a new system prompt for the session.
    pub fn set_system_prompt(&mut self, prompt: String) {
        self.system_prompt = Message::new(Role::System, prompt);
    }

    pub fn system_prompt_text(&self) -> &str {
        &self.system_prompt.content
    }

    /// Inject a message into history without calling the model.
    pub fn inject_message(&mut self, role: Role, content: String) {
        self.conversation_history.push(Message::new(role, content));
    }

    pub fn conversation_history(&self) -> &[Message] {
        &self.conversation_history
    }

    pub fn clear_history(&mut self) {
        self.conversation_history.clear();
    }

    /// Returns the current token usage statistics
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.total_input_tokens,
            output_tokens: self.total_output_tokens,
            total_tokens: self.total_token_count,
        }
    }

    pub fn get_max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }
}

/// Estimates the number of tokens in a string.
/// Uses an approximate formula: one token per 4 characters.
pub fn estimate_token_count(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Estimates the number of tokens in a Message, including role annotations.
pub fn estimate_message_token_count(message: &Message) -> usize {
    // Assuming the role adds some fixed number of tokens, e.g., 1 token
    let role_token_count = 1;
    role_token_count + estimate_token_count(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_never_returns_zero() {
        assert_eq!(estimate_token_count(""), 1);
        assert_eq!(estimate_token_count("abcdefgh"), 2);
        let msg = Message::new(Role::User, "abcdefgh");
        assert_eq!(estimate_message_token_count(&msg), 3);
    }
}
