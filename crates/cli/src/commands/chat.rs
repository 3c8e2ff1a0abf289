//! `crank chat` — interactive session with history threaded across turns.

use std::io::Write;
use std::sync::Arc;

use crank_agent::{AgentLoop, ApprovalGate};
use crank_config::AppConfig;
use crank_core::approval::ApprovalSource;
use crank_core::event::EventBus;
use crank_core::message::Message;

use crate::runtime;

pub async fn run(yolo: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let provider = runtime::build_provider(&config)?;
    let agent_config = runtime::agent_config(&config);

    let approval_source: Option<Arc<dyn ApprovalSource>> = if yolo {
        None
    } else {
        Some(Arc::new(runtime::StdinApprovalSource))
    };

    let events = Arc::new(EventBus::default());
    let renderer = runtime::spawn_event_renderer(&events);

    // One gate for the whole session: "always" decisions persist
    // across turns.
    let gate = Arc::new(ApprovalGate::new(approval_source.clone()));

    let mut history: Vec<Message> = Vec::new();

    println!("crank chat — {} via {}", config.default_model, config.default_provider);
    println!("Type a message, or 'exit' to quit.\n");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }

        let cancel = runtime::cancel_on_ctrl_c();
        let registry = runtime::build_registry(
            provider.clone(),
            &agent_config,
            approval_source.clone(),
            events.clone(),
            cancel.clone(),
        );
        let agent = AgentLoop::new(provider.clone(), registry, agent_config.clone())
            .with_gate(gate.clone())
            .with_events(events.clone())
            .with_cancel(cancel);

        let result = agent.run(prompt, history.clone()).await;
        println!("\n");

        history.push(Message::user(prompt));
        history.push(Message::assistant(&result.answer));
    }

    renderer.abort();
    Ok(())
}
