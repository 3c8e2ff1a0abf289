//! `crank run` — one-shot agent run.

use std::sync::Arc;

use crank_agent::{AgentLoop, ApprovalGate, RunOutcome};
use crank_config::AppConfig;
use crank_core::approval::ApprovalSource;
use crank_core::event::EventBus;

use crate::runtime;

pub async fn run(prompt: &str, yolo: bool) -> Result<(), Box<dyn std::error::Error>> {
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
    let cancel = runtime::cancel_on_ctrl_c();

    let registry = runtime::build_registry(
        provider.clone(),
        &agent_config,
        approval_source.clone(),
        events.clone(),
        cancel.clone(),
    );

    // Gate built per invocation: "always" decisions last for this run.
    let gate = Arc::new(ApprovalGate::new(approval_source));
    let agent = AgentLoop::new(provider, registry, agent_config)
        .with_gate(gate)
        .with_events(events.clone())
        .with_cancel(cancel);

    let result = agent.run(prompt, Vec::new()).await;
    renderer.abort();

    println!("\n\n{}", result.answer);
    eprintln!(
        "\n[{:?} in {} iterations, {} tokens]",
        result.outcome, result.iterations, result.usage.total_tokens
    );

    if matches!(result.outcome, RunOutcome::Failed) {
        std::process::exit(1);
    }
    Ok(())
}
