use async_trait::async_trait;
use futures_util::stream;
use handoff_orchestrator::{
    default_agent_cards, AgentRegistry, ClientWrapper, ConversationalAgent, HandoffConfig,
    HandoffController, LlmAgent, Message, MessageChunk, MessageChunkStream, Role, Roster,
    ScriptedAgent, SendError, SessionState, TokenUsage, TurnContext,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// Replays queued responses, then repeats the fallback forever.
struct MockClient {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    requests: Mutex<Vec<Vec<Message>>>,
    usage: Mutex<Option<TokenUsage>>,
    report_usage: bool,
}

impl MockClient {
    fn new(responses: Vec<&str>) -> Self {
        MockClient {
            responses: Mutex::new(responses.into_iter().map(|s| s.to_string()).collect()),
            fallback: "Happy to help.".to_string(),
            requests: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
            report_usage: false,
        }
    }

    fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = fallback.to_string();
        self
    }

    fn with_usage(mut self) -> Self {
        self.report_usage = true;
        self
    }

    fn next_response(&self, messages: &[Message]) -> String {
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.report_usage {
            *self.usage.lock().unwrap() = Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            });
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Vec<Message> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, SendError> {
        Ok(Message::new(Role::Assistant, self.next_response(messages)))
    }

    async fn send_message_stream(&self, messages: &[Message]) -> Result<MessageChunkStream, SendError> {
        let text = self.next_response(messages);
        let middle = text.len() / 2;
        let chunks: Vec<Result<MessageChunk, SendError>> = vec![
            Ok(MessageChunk {
                content: text[..middle].to_string(),
                is_final: false,
            }),
            Ok(MessageChunk {
                content: text[middle..].to_string(),
                is_final: false,
            }),
            Ok(MessageChunk {
                content: String::new(),
                is_final: true,
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

const HANDOFF_TO_B: &str = r#"Let me get Agent B. {"tool_call": {"name": "handoff_to_agent", "parameters": {"agent_name": "agent_b"}}}"#;

fn agent_a_card() -> handoff_orchestrator::AgentCard {
    default_agent_cards().remove(1)
}

#[tokio::test]
async fn llm_agent_hands_off_through_the_tool_protocol() {
    let client = Arc::new(MockClient::new(vec![HANDOFF_TO_B]));
    let mut cards = default_agent_cards().into_iter();
    let triage = LlmAgent::new(cards.next().unwrap(), client.clone());
    let mut registry = AgentRegistry::new(Box::new(triage));
    registry.register(Box::new(ScriptedAgent::new(cards.next().unwrap()))).unwrap();
    registry.register(Box::new(ScriptedAgent::new(cards.next().unwrap()))).unwrap();
    let mut controller = HandoffController::new(registry, HandoffConfig::default()).unwrap();

    let outcome = controller.process("I need help planning a trip").await.unwrap();

    assert_eq!(client.calls(), 1);
    assert_eq!(controller.state().current_agent(), "agent_b");
    assert_eq!(
        outcome.suppressed[0].content,
        "The conversation will be handed over to Agent B. No need to respond!"
    );
    assert_eq!(outcome.replies[0].agent_id, "agent_b");
}

#[tokio::test]
async fn unknown_tool_result_is_fed_back_to_the_model() {
    let client = Arc::new(MockClient::new(vec![
        r#"{"tool_call": {"name": "weather", "parameters": {"city": "Paris"}}}"#,
        "Sorry, I can't check the weather.",
    ]));
    let mut agent = LlmAgent::new(agent_a_card(), client.clone());

    let cards = default_agent_cards();
    let mut state = SessionState::new("triage");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "weather?", true);
    let response = agent.respond("weather?", &mut ctx).await.unwrap();

    assert_eq!(response.content, "Sorry, I can't check the weather.");
    assert_eq!(response.tool_results, vec!["Error: Unknown tool 'weather'".to_string()]);
    let follow_up = client.last_request();
    assert_eq!(
        follow_up.last().map(|m| m.content.as_str()),
        Some("Tool 'weather' result: Error: Unknown tool 'weather'")
    );
}

#[tokio::test]
async fn missing_parameter_is_reported() {
    let client = Arc::new(MockClient::new(vec![
        r#"{"tool_call": {"name": "handoff_to_agent", "parameters": {}}}"#,
    ]));
    let mut agent = LlmAgent::new(agent_a_card(), client.clone());

    let cards = default_agent_cards();
    let mut state = SessionState::new("agent_a");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "hi", true);
    let response = agent.respond("hi", &mut ctx).await.unwrap();

    assert_eq!(response.tool_results, vec!["Error: Missing parameter 'agent_name'".to_string()]);
    assert_eq!(response.content, "Happy to help.");
    assert!(!ctx.handed_off());
}

#[tokio::test]
async fn tool_loop_stops_after_five_iterations() {
    let clarify = r#"{"tool_call": {"name": "clarify_ambiguous_request", "parameters": {"ambiguity_type": "agent_reference", "options": ["Agent A", "Agent B"]}}}"#;
    let client = Arc::new(MockClient::new(vec![]).with_fallback(clarify));
    let mut agent = LlmAgent::new(agent_a_card(), client.clone());

    let cards = default_agent_cards();
    let mut state = SessionState::new("agent_a");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "hi", true);
    let response = agent.respond("hi", &mut ctx).await.unwrap();
    drop(ctx);

    assert_eq!(client.calls(), 6);
    assert_eq!(response.tool_results.len(), 5);
    assert!(response
        .content
        .ends_with("[Warning: Maximum tool iterations reached]"));
    assert_eq!(
        state.needs_clarification().map(|c| c.options.clone()),
        Some(vec!["Agent A".to_string(), "Agent B".to_string()])
    );
}

#[tokio::test]
async fn streaming_replies_are_assembled() {
    let client = Arc::new(MockClient::new(vec!["Boil salted water first."]));
    let mut agent = LlmAgent::new(agent_a_card(), client.clone()).with_streaming(true);

    let cards = default_agent_cards();
    let mut state = SessionState::new("agent_a");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "pasta?", true);
    let response = agent.respond("pasta?", &mut ctx).await.unwrap();

    assert_eq!(response.content, "Boil salted water first.");
    let history = agent.session().conversation_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Boil salted water first.");
}

#[tokio::test]
async fn system_prompt_lists_only_available_tools() {
    let client = Arc::new(MockClient::new(vec![]));
    let mut agent = LlmAgent::new(agent_a_card(), client.clone())
        .with_instructions("You are a friendly cooking expert.");
    let cards = default_agent_cards();

    let mut state = SessionState::new("agent_a");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "hi", true);
    agent.respond("hi", &mut ctx).await.unwrap();
    let prompt = agent.session().system_prompt_text().to_string();
    assert!(prompt.starts_with("You are a friendly cooking expert."));
    assert!(prompt.contains("- Agent B (agent_b): Specialized agent B"));
    assert!(prompt.contains("agent_name (String): one of 'agent_a', 'agent_b'"));
    assert!(prompt.contains("clarify_ambiguous_request"));

    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "hi", false);
    agent.respond("relay this", &mut ctx).await.unwrap();
    let prompt = agent.session().system_prompt_text();
    assert!(!prompt.contains("handoff_to_agent"));
    assert!(prompt.contains("clarify_ambiguous_request"));

    let sent = client.last_request();
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent[0].content, prompt);
}

#[tokio::test]
async fn token_usage_accumulates_across_tool_calls() {
    let client = Arc::new(
        MockClient::new(vec![
            r#"{"tool_call": {"name": "clarify_ambiguous_request", "parameters": {"ambiguity_type": "topic", "options": ["pasta", "pizza"]}}}"#,
            "Which one would you like?",
        ])
        .with_usage(),
    );
    let mut agent = LlmAgent::new(agent_a_card(), client.clone());

    let cards = default_agent_cards();
    let mut state = SessionState::new("agent_a");
    let mut ctx = TurnContext::new(&mut state, Roster::new(&cards, "triage"), "hi", true);
    let response = agent.respond("hi", &mut ctx).await.unwrap();

    let usage = response.tokens_used.expect("usage reported");
    assert_eq!(usage.input_tokens, 20);
    assert_eq!(usage.output_tokens, 10);
    assert_eq!(usage.total_tokens, 30);
    assert_eq!(agent.session().token_usage().total_tokens, 15);
}
