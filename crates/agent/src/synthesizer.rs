//! Response synthesizer — turns step results into the final answer.
//!
//! The answer text comes from the reasoning backend; the acknowledgement of
//! failed or skipped steps is appended deterministically so that it can
//! never be dropped by the model.

use planwright_core::{
    Conversation, Message, PlanStep, Provider, ProviderRequest, StepId, StepResult, StepStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::LoopError;

/// The terminal artifact of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub text: String,
    /// Successful steps the answer drew from, in execution order.
    pub sources: Vec<StepId>,
    pub elapsed_ms: u64,
}

/// What the synthesizer reads.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub request: &'a str,
    pub analysis: &'a str,
    pub conversation: &'a Conversation,
    pub steps: &'a [PlanStep],
    pub results: &'a [StepResult],
}

const SUMMARY_PROMPT: &str = "You write the final answer to the user's task from the results of the \
steps that were executed for it. Use every successful result. Be direct and complete; do not \
describe the process unless it matters to the answer. If some steps failed, answer as well as \
the remaining results allow.";

/// Output characters per step passed to the backend.
const MAX_OUTPUT_CHARS: usize = 4000;

pub struct ResponseSynthesizer {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl ResponseSynthesizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Answer text plus sources. `elapsed_ms` is left for the caller to fill.
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Result<FinalResponse, LoopError> {
        let goals: HashMap<StepId, &PlanStep> = input.steps.iter().map(|s| (s.id, s)).collect();

        let mut request = ProviderRequest::prompt(&self.model, SUMMARY_PROMPT, self.temperature);
        request.messages.extend(input.conversation.messages().iter().cloned());
        request.messages.push(Message::user(format!(
            "Task: {}\nAnalysis: {}\n\nStep results:\n{}",
            input.request,
            if input.analysis.is_empty() { "(none)" } else { input.analysis },
            describe_results(input.results, &goals)
        )));

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| LoopError::BackendUnavailable(e.to_string()))?;

        let mut text = response.message.content.trim().to_string();
        let unresolved = unresolved_steps(input.steps, input.results);
        if !unresolved.is_empty() {
            text.push_str("\n\n");
            text.push_str(&acknowledge(&unresolved, &goals));
        }
        debug!(
            sources = input.results.iter().filter(|r| r.is_success()).count(),
            unresolved = unresolved.len(),
            "Synthesized response"
        );

        Ok(FinalResponse {
            text,
            sources: input.results.iter().filter(|r| r.is_success()).map(|r| r.step_id).collect(),
            elapsed_ms: 0,
        })
    }
}

fn describe_results(results: &[StepResult], goals: &HashMap<StepId, &PlanStep>) -> String {
    if results.is_empty() {
        return "(no steps executed)".into();
    }
    results
        .iter()
        .map(|r| {
            let goal = goals.get(&r.step_id).map(|s| s.goal.as_str()).unwrap_or("?");
            let body = match r.status {
                StepStatus::Success if r.payload.output.is_empty() => r.payload.summary.clone(),
                StepStatus::Success => truncate(&r.payload.output),
                _ => r.payload.error.clone().unwrap_or_default(),
            };
            format!("[{}] step {}: {goal}\n{body}", r.status.as_str(), r.step_id)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    format!("{cut}\n[output truncated]")
}

/// Failed or skipped results that no later successful step superseded.
pub fn unresolved_steps<'a>(steps: &[PlanStep], results: &'a [StepResult]) -> Vec<&'a StepResult> {
    let succeeded: Vec<StepId> = results.iter().filter(|r| r.is_success()).map(|r| r.step_id).collect();
    let superseded: Vec<StepId> = steps
        .iter()
        .filter(|s| succeeded.contains(&s.id))
        .filter_map(|s| s.supersedes)
        .collect();

    results
        .iter()
        .filter(|r| matches!(r.status, StepStatus::Failure | StepStatus::Skipped))
        .filter(|r| !superseded.contains(&r.step_id))
        .collect()
}

fn acknowledge(unresolved: &[&StepResult], goals: &HashMap<StepId, &PlanStep>) -> String {
    let lines: Vec<String> = unresolved
        .iter()
        .map(|r| {
            let goal = goals.get(&r.step_id).map(|s| s.goal.as_str()).unwrap_or("unknown step");
            let verb = if r.status == StepStatus::Skipped { "was skipped" } else { "failed" };
            let reason = r.reason.as_ref().map(|x| x.as_str()).unwrap_or("unknown");
            match r.payload.error.as_deref().filter(|e| !e.is_empty()) {
                Some(detail) => format!("- Step {} ({goal}) {verb} [{reason}]: {detail}", r.step_id),
                None => format!("- Step {} ({goal}) {verb} [{reason}]", r.step_id),
            }
        })
        .collect();
    format!("Not completed:\n{}", lines.join("\n"))
}
