//! `planwright run` — plan and execute one request, streaming its events.

use planwright_agent::{LoopEvent, Orchestrator, controller_from_config};
use planwright_core::{AgentRequest, ConfirmationProposal, ConfirmationResponse, EventBus, StepId};
use planwright_tools::{McpManager, builtin_registry};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// How confirmation requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Ask,
    Approve,
    Reject,
}

pub async fn run(message: String, mode: ConfirmMode, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let provider = super::default_provider(&config)?;

    let registry = Arc::new(builtin_registry(&config, Some(Arc::clone(&provider))));
    let controller = controller_from_config(&config, Arc::clone(&provider), registry)
        .with_discovery(Arc::new(McpManager::new()))
        .with_event_bus(Arc::new(EventBus::default()));
    let orchestrator = Orchestrator::new(controller, provider).with_mcp_servers(config.mcp_servers.clone());

    let mut handle = orchestrator.start(AgentRequest::new(message));
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(event) = handle.next_event().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        if let LoopEvent::ConfirmationRequired { step_id, proposal } = &event {
            let response = match mode {
                ConfirmMode::Approve => ConfirmationResponse::approve(*step_id),
                ConfirmMode::Reject => ConfirmationResponse::reject(*step_id),
                ConfirmMode::Ask => ask(*step_id, proposal, &mut stdin).await?,
            };
            handle.confirm(response).await?;
        }
    }

    match handle.finish().await.outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ask<R>(
    step_id: StepId,
    proposal: &ConfirmationProposal,
    stdin: &mut tokio::io::Lines<R>,
) -> Result<ConfirmationResponse, Box<dyn std::error::Error>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    loop {
        stdout
            .write_all(b"  [a]pprove, [r]eject, or [m]odify <new goal>? ")
            .await?;
        stdout.flush().await?;

        // End of input rejects
        let Some(line) = stdin.next_line().await? else {
            return Ok(ConfirmationResponse::reject(step_id));
        };
        if let Some(response) = parse_answer(step_id, proposal, &line) {
            return Ok(response);
        }
    }
}

fn parse_answer(step_id: StepId, proposal: &ConfirmationProposal, line: &str) -> Option<ConfirmationResponse> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command.to_ascii_lowercase().as_str() {
        "a" | "approve" | "y" | "yes" => {
            let response = ConfirmationResponse::approve(step_id);
            Some(if rest.is_empty() { response } else { response.with_feedback(rest) })
        }
        "r" | "reject" | "n" | "no" => Some(ConfirmationResponse::reject(step_id)),
        "m" | "modify" => {
            let goal = if rest.is_empty() { proposal.goal.as_str() } else { rest };
            Some(ConfirmationResponse::modify(step_id, goal))
        }
        _ => None,
    }
}

fn print_event(event: &LoopEvent) {
    match event {
        LoopEvent::PlanCreated {
            revision,
            analysis,
            steps,
        } => {
            println!();
            println!("  Plan (revision {revision}): {analysis}");
            for step in steps {
                println!(
                    "    [{}] {} (tool: {}, uncertainty {:.2})",
                    step.id,
                    step.goal,
                    step.tool.as_deref().unwrap_or("none"),
                    step.uncertainty
                );
            }
            println!();
        }
        LoopEvent::StepStarted { step_id, goal, .. } => {
            println!("  ▶ Step {step_id}: {goal}");
        }
        LoopEvent::StepResult {
            step_id,
            status,
            reason,
            payload,
            duration_ms,
        } => {
            let detail = payload
                .error
                .as_deref()
                .filter(|_| payload.summary.is_empty())
                .unwrap_or(&payload.summary);
            let reason = reason.as_ref().map(|r| format!(" [{}]", r.as_str())).unwrap_or_default();
            println!(
                "  ■ Step {step_id} {}{reason} in {duration_ms} ms: {detail}",
                status.as_str()
            );
        }
        LoopEvent::ConfirmationRequired { step_id, proposal } => {
            println!();
            println!(
                "  ⚠ Step {step_id} ({}/{}) needs confirmation",
                proposal.position, proposal.total_steps
            );
            println!("    Goal:        {}", proposal.goal);
            println!("    Tool:        {}", proposal.tool.as_deref().unwrap_or("none"));
            if !proposal.arguments.is_null() {
                println!("    Arguments:   {}", proposal.arguments);
            }
            println!("    Uncertainty: {:.2}", proposal.uncertainty);
            if let Some(reason) = &proposal.uncertainty_reason {
                println!("    Why:         {reason}");
            }
            if let Some(expected) = &proposal.expected_result {
                println!("    Expected:    {expected}");
            }
        }
        LoopEvent::Replanning { reason, attempt } => {
            println!("  ↻ Re-planning (attempt {attempt}): {reason}");
        }
        LoopEvent::FinalResponse { text, elapsed_ms, .. } => {
            println!();
            println!("{text}");
            println!();
            println!("  ({elapsed_ms} ms)");
        }
        LoopEvent::Error { kind, message, .. } => {
            eprintln!();
            eprintln!("  [{kind}] {message}");
        }
    }
}
