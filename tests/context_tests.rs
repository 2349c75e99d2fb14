use chrono::Utc;
use handoff_orchestrator::{
    build_handoff_payload, default_agent_cards, AgentRegistry, ConversationContext, HandoffConfig,
    HandoffController, HandoffRecord, ScriptedAgent,
};

fn controller() -> HandoffController {
    let mut cards = default_agent_cards().into_iter();
    let mut registry = AgentRegistry::new(Box::new(ScriptedAgent::new(cards.next().unwrap())));
    for card in cards {
        registry.register(Box::new(ScriptedAgent::new(card))).unwrap();
    }
    HandoffController::new(registry, HandoffConfig::default()).unwrap()
}

#[tokio::test]
async fn summarizing_twice_changes_nothing() {
    let mut controller = controller();
    controller.process("How do I boil pasta?").await.unwrap();

    let runs_before = controller.registry().memory("triage").unwrap().len();
    let first = controller.summarize("triage").await.unwrap();
    let second = controller.summarize("triage").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(controller.registry().memory("triage").unwrap().len(), runs_before);
}

#[tokio::test]
async fn summarizing_an_unknown_agent_fails() {
    let mut controller = controller();
    let err = controller.summarize("agent_c").await.unwrap_err();
    assert_eq!(err.to_string(), "Agent 'agent_c' is not registered");
}

#[test]
fn payload_embeds_history_and_context_as_json() {
    let history = vec![HandoffRecord {
        from: "triage".into(),
        to: "agent_a".into(),
        timestamp: Utc::now(),
    }];
    let context = ConversationContext {
        last_response: "Use plenty of salted water.".into(),
        last_agent: "agent_a".into(),
        timestamp: Utc::now(),
    };

    let payload = build_handoff_payload(
        "Agent A",
        "Agent B",
        "Conversation with 1 exchange:\n- User: pasta?",
        "Now plan a trip",
        &history,
        Some(&context),
    );

    assert!(payload.starts_with("You've been handed off this conversation from Agent A."));
    assert!(payload.contains("\"from\": \"triage\""));
    assert!(payload.contains("\"last_agent\": \"agent_a\""));
    assert!(payload.contains(
        "<previous_agent_context>\nUse plenty of salted water.\n</previous_agent_context>"
    ));
    assert!(payload.contains("<last_user_message>\nNow plan a trip\n</last_user_message>"));

    let start = payload.find("<handoff_history>\n").unwrap() + "<handoff_history>\n".len();
    let end = payload.find("\n</handoff_history>").unwrap();
    let parsed: Vec<HandoffRecord> = serde_json::from_str(&payload[start..end]).unwrap();
    assert_eq!(parsed, history);
}

#[tokio::test]
async fn receiving_agent_sees_the_previous_reply() {
    let mut cards = default_agent_cards().into_iter();
    let triage = ScriptedAgent::new(cards.next().unwrap());
    let agent_a = ScriptedAgent::new(cards.next().unwrap())
        .with_default_reply("Use plenty of salted water.");
    let agent_b = ScriptedAgent::new(cards.next().unwrap());
    let inbox = agent_b.inbox();

    let mut registry = AgentRegistry::new(Box::new(triage));
    registry.register(Box::new(agent_a)).unwrap();
    registry.register(Box::new(agent_b)).unwrap();
    let mut controller = HandoffController::new(registry, HandoffConfig::default()).unwrap();

    controller.process("talk to Agent A").await.unwrap();
    controller.process("pasta tips?").await.unwrap();
    controller.process("switch to Agent B").await.unwrap();

    let received = inbox.lock().unwrap().last().cloned().unwrap();
    assert!(received.contains(
        "<previous_agent_context>\nUse plenty of salted water.\n</previous_agent_context>"
    ));
    let context = controller.state().conversation_context().unwrap();
    assert_eq!(context.last_agent, "agent_b");
}
