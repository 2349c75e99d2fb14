//! A ClientWrapper is a wrapper around a specific LLM service.
//! It provides a common interface to interact with the LLM behind an
//! [`LlmAgent`](crate::LlmAgent) or an [`LlmSummarizer`](crate::LlmSummarizer).
//! It does not keep track of the conversation, for that we use an LLMSession
//! which keeps track of the conversation history and uses a ClientWrapper to
//! interact with the LLM.

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::pin::Pin;
use std::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    // set by the developer to steer the model's responses
    User,
    // a message sent by a human user, or a routing payload built by the orchestrator
    // also carries the textual result of a routing tool call fed back to the model
    Assistant, // lets the model know the content was generated as a response to a user message
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Represents a chunk of a streaming message response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content in this chunk.
    pub content: String,
    /// Whether this is the final chunk in the stream.
    pub is_final: bool,
}

/// Type alias for a Send-able error box
pub type SendError = Box<dyn Error + Send + Sync>;

/// Stream of chunks returned by [`ClientWrapper::send_message_stream`].
pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, SendError>> + Send>>;

/// Trait defining the interface to interact with various LLM services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a message to the LLM and get a response.
    /// - `messages`: The messages to send in the request.
    async fn send_message(&self, messages: &[Message]) -> Result<Message, SendError>;

    /// Send a message to the LLM and get a streaming response.
    /// - `messages`: The messages to send in the request.
    /// Returns a Stream of MessageChunk items, allowing tokens to be processed as they arrive.
    /// This method has a default implementation that returns an error, so existing
    /// implementations don't break. Clients that support streaming should override this.
    async fn send_message_stream(&self, _messages: &[Message]) -> Result<MessageChunkStream, SendError> {
        Err("Streaming not supported by this client".into())
    }

    /// Name of the model behind this client, used in log lines.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* send_message() call.
    /// Default impl reads the usage slot, if the wrapper exposes one.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // ClientWrapper implementations supporting TokenUsage tracking should return a Mutex<Option<TokenUsage>> by overriding this method.
        None
    }
}
