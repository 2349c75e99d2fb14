use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use handoff_orchestrator::{
    default_agent_cards, AgentRegistry, EventHandler, HandoffConfig, HandoffController,
    HandoffEvent, ScriptedAction, ScriptedAgent,
};

// Replays the reference conversations against scripted agents:
//   cargo run --example handoff_playground
// Type your own messages instead:
//   RUST_LOG=info cargo run --example handoff_playground -- --interactive

struct RoutingPrinter;

#[async_trait]
impl EventHandler for RoutingPrinter {
    async fn on_handoff_event(&self, event: &HandoffEvent) {
        match event {
            HandoffEvent::HandoffCompleted { from, to, .. } => {
                println!("   [handoff] {} -> {}", from, to);
            }
            HandoffEvent::HandoffRejected { target, reason, .. } => {
                println!("   [refused] {}: {}", target, reason);
            }
            HandoffEvent::ChainLimitReached { limit, .. } => {
                println!("   [chain limit] stopped after {} handoffs", limit);
            }
            _ => {}
        }
    }
}

fn build_controller() -> Result<HandoffController, Box<dyn std::error::Error + Send + Sync>> {
    let mut cards = default_agent_cards().into_iter();
    let (triage, agent_a, agent_b) = match (cards.next(), cards.next(), cards.next()) {
        (Some(t), Some(a), Some(b)) => (t, a, b),
        _ => return Err("default roster is incomplete".into()),
    };

    let triage = ScriptedAgent::new(triage)
        .on_contains(
            "recipe and a wine",
            ScriptedAction::MultiAgent {
                primary: "agent_a".into(),
                secondary: "agent_b".into(),
                primary_message: "Suggest a recipe".into(),
                secondary_message: "Suggest a wine to go with it".into(),
            },
        )
        .on_contains(
            "cooking",
            ScriptedAction::Handoff {
                target: "agent_a".into(),
                reply: "Agent A is our cooking expert.".into(),
            },
        )
        .with_default_reply("Hi, I'm the triage agent. Ask me anything or name an agent.");
    let agent_a = ScriptedAgent::new(agent_a)
        .on_contains("travel", ScriptedAction::Handoff {
            target: "agent_b".into(),
            reply: "Travel is Agent B's area.".into(),
        })
        .on_contains("recipe", ScriptedAction::Reply("Try a mushroom risotto.".into()))
        .with_default_reply("Agent A here. Cooking is my thing.");
    let agent_b = ScriptedAgent::new(agent_b)
        .on_contains("wine", ScriptedAction::Reply("A dry white goes well with risotto.".into()))
        .with_default_reply("Agent B here. Let's talk travel.");

    let registry = AgentRegistry::new(Box::new(triage))
        .with_agent(Box::new(agent_a))?
        .with_agent(Box::new(agent_b))?;
    Ok(HandoffController::new(registry, HandoffConfig::default())?
        .with_event_handler(Arc::new(RoutingPrinter)))
}

async fn turn(
    controller: &mut HandoffController,
    message: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("\nYou: {}", message);
    let outcome = controller.process(message).await?;
    for reply in &outcome.replies {
        println!("{}: {}", reply.agent_name, reply.content);
    }
    if let Some(clarification) = &outcome.clarification {
        println!("   [options] {}", clarification.options.join(" | "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    handoff_orchestrator::init_logger();
    let mut controller = build_controller()?;

    if env::args().any(|a| a == "--interactive") {
        println!("Type a message, or an empty line to quit.");
        let stdin = io::stdin();
        loop {
            print!("> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
            turn(&mut controller, line.trim()).await?;
        }
        return Ok(());
    }

    let scenarios: Vec<(&str, Vec<&str>)> = vec![
        (
            "Direct request",
            vec!["I want to talk to A", "Who are you?"],
        ),
        (
            "Context across a handoff",
            vec!["How do I make risotto?", "I want to talk to Agent B", "What did Agent A say about risotto?"],
        ),
        (
            "Multiple requests in one message",
            vec!["Talk to Agent A about cooking and then ask Agent B about travel"],
        ),
        (
            "Ambiguous reference",
            vec!["switch to the previous agent or Agent A"],
        ),
        (
            "Relay without handing off",
            vec!["go back to the main agent", "tell Agent B that I need a wine suggestion"],
        ),
        (
            "Two agents for one question",
            vec!["I'd like a recipe and a wine pairing"],
        ),
        (
            "Audit",
            vec!["Who handled my questions?"],
        ),
    ];

    for (title, messages) in scenarios {
        println!("\n=== {} ===", title);
        for message in messages {
            turn(&mut controller, message).await?;
        }
    }

    println!("\nHandoff history:");
    for record in controller.state().handoff_history() {
        println!("  {} -> {} at {}", record.from, record.to, record.timestamp);
    }
    Ok(())
}
