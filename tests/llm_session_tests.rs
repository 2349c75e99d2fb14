use async_trait::async_trait;
use handoff_orchestrator::client_wrapper::{ClientWrapper, Message, Role, SendError, TokenUsage};
use handoff_orchestrator::LLMSession;
use std::sync::{Arc, Mutex};

// Mock client reporting a fixed usage after every call
struct MockClient {
    usage: Mutex<Option<TokenUsage>>,
    total_tokens: usize,
    response_content: String,
    last_message_count: Mutex<usize>,
}

impl MockClient {
    fn new(response_content: &str, total_tokens: usize) -> Self {
        Self {
            usage: Mutex::new(None),
            total_tokens,
            response_content: response_content.to_string(),
            last_message_count: Mutex::new(0),
        }
    }

    fn get_last_message_count(&self) -> usize {
        *self.last_message_count.lock().unwrap()
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, SendError> {
        *self.last_message_count.lock().unwrap() = messages.len();
        *self.usage.lock().unwrap() = Some(TokenUsage {
            input_tokens: self.total_tokens - 10,
            output_tokens: 10,
            total_tokens: self.total_tokens,
        });
        Ok(Message::new(Role::Assistant, self.response_content.clone()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[tokio::test]
async fn test_system_prompt_is_prepended() {
    let client = Arc::new(MockClient::new("Hi there", 20));
    let mut session = LLMSession::new(client.clone(), "You are Agent A.".to_string(), 1_000);

    let reply = session
        .send_message(Role::User, "Hello".to_string())
        .await
        .unwrap();

    assert_eq!(reply.content, "Hi there");
    assert_eq!(client.get_last_message_count(), 2);
    assert_eq!(session.conversation_history().len(), 2);
    assert_eq!(session.token_usage().total_tokens, 20);
    assert_eq!(session.token_usage().output_tokens, 10);
}

#[tokio::test]
async fn test_history_is_trimmed_when_usage_exceeds_window() {
    let client = Arc::new(MockClient::new("ok", 100));
    let mut session = LLMSession::new(client.clone(), "system".to_string(), 50);

    // 40 chars per message: 11 estimated tokens each
    for _ in 0..10 {
        session.inject_message(Role::User, "x".repeat(40));
    }
    session
        .send_message(Role::User, "y".repeat(40))
        .await
        .unwrap();

    // 50 tokens over: five messages removed, then the reply appended
    assert_eq!(client.get_last_message_count(), 12);
    assert_eq!(session.conversation_history().len(), 7);
    assert_eq!(session.conversation_history()[6].content, "ok");
}

#[tokio::test]
async fn test_clear_history_keeps_system_prompt() {
    let client = Arc::new(MockClient::new("ok", 20));
    let mut session = LLMSession::new(client.clone(), "system".to_string(), 1_000);
    session.send_message(Role::User, "one".to_string()).await.unwrap();
    session.clear_history();
    assert!(session.conversation_history().is_empty());

    session.set_system_prompt("You are Agent B.".to_string());
    session.send_message(Role::User, "two".to_string()).await.unwrap();
    assert_eq!(session.system_prompt_text(), "You are Agent B.");
    assert_eq!(client.get_last_message_count(), 2);
}

#[tokio::test]
async fn test_streaming_without_support_fails() {
    let client = Arc::new(MockClient::new("ok", 20));
    let mut session = LLMSession::new(client, "system".to_string(), 1_000);
    let err = session
        .send_message_stream(Role::User, "hi".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Streaming not supported by this client");
}
