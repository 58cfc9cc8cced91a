//! Planner — decomposes a request into an [`ExecutionPlan`].
//!
//! [`LlmPlanner`] asks the reasoning backend for a JSON plan and parses it
//! out of whatever prose surrounds it. Step ids are assigned here, starting
//! at the `next_id` the controller hands in, so ids stay unique across
//! re-plans and never collide with already-committed results.

use async_trait::async_trait;
use planwright_core::{
    Conversation, ExecutionPlan, Message, PlanStep, Provider, ProviderRequest, StepId, StepResult,
    StepStatus, ToolDescriptor,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::PlanError;

/// Everything a planner sees for one planning call.
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    /// The latest user message.
    pub request: &'a str,
    /// Conversation so far, including the latest message.
    pub conversation: &'a Conversation,
    /// Registry snapshot.
    pub tools: &'a [ToolDescriptor],
    /// Results recorded so far, empty on the first call.
    pub results: &'a [StepResult],
    /// Every step created so far, in creation order.
    pub known_steps: &'a [PlanStep],
    /// Why the previous plan was abandoned.
    pub replan_reason: Option<&'a str>,
    pub revision: u32,
    /// First id available to new steps.
    pub next_id: StepId,
}

impl PlanningInput<'_> {
    pub fn is_replan(&self) -> bool {
        self.replan_reason.is_some()
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: PlanningInput<'_>) -> Result<ExecutionPlan, PlanError>;
}

const PLANNING_PROMPT: &str = r#"You are a task planner. Decompose the user's task into concrete, executable steps (at least one).

For every step give:
- "step": its number in this plan, starting at 1
- "description": what the step accomplishes
- "tool": the name of one available tool, or "none" for a pure reasoning step
- "arguments": the tool arguments as a JSON object matching the tool's schema
- "expected_result": what a successful step produces
- "uncertainty": a number from 0 to 1, how likely the step needs human confirmation
- "uncertainty_reason": why, when uncertainty is high
- "depends_on": numbers of earlier steps in this plan whose output this step needs

Use a high uncertainty for steps that touch unspecified files or paths, need the user to choose or provide details, are destructive or irreversible, change system configuration, or access private data.

Reply with JSON only, in this format:
{
  "task_analysis": "your understanding of the task",
  "execution_plan": [
    {"step": 1, "description": "...", "tool": "...", "arguments": {}, "expected_result": "...", "uncertainty": 0.1, "uncertainty_reason": "", "depends_on": []}
  ]
}"#;

const REPLAN_INSTRUCTIONS: &str = r#"The previous plan could not be completed. Plan only the remaining work. Do not repeat steps that already succeeded; reference their output with "uses_results": [ids]. A step that retries or replaces a failed or skipped step should set "supersedes": <id>. Do not reuse a tool that was not found."#;

/// Plans through the reasoning backend.
pub struct LlmPlanner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, input: &PlanningInput<'_>) -> ProviderRequest {
        let system = format!(
            "{PLANNING_PROMPT}\n\nAvailable tools:\n{}",
            describe_tools(input.tools)
        );
        let mut request = ProviderRequest::prompt(&self.model, system, self.temperature);
        request.messages.extend(input.conversation.messages().iter().cloned());

        if input.conversation.last_user_message().map(|m| m.content.as_str()) != Some(input.request) {
            request.messages.push(Message::user(input.request));
        }
        if input.is_replan() {
            let reason = input.replan_reason.unwrap_or_default();
            request.messages.push(Message::user(format!(
                "{REPLAN_INSTRUCTIONS}\n\nReason: {reason}\n\nProgress so far:\n{}",
                describe_progress(input.known_steps, input.results)
            )));
        }
        request
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, input: PlanningInput<'_>) -> Result<ExecutionPlan, PlanError> {
        let request = self.build_request(&input);
        let response = self.provider.complete(request).await?;
        debug!(
            revision = input.revision,
            chars = response.message.content.len(),
            "Planner replied"
        );
        parse_plan(&response.message.content, input.revision, input.next_id)
    }
}

fn describe_tools(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "(none; use \"none\" for every step)".into();
    }
    tools
        .iter()
        .map(|t| {
            let mut traits = vec![if t.contract.auto_run { "runs automatically" } else { "may need confirmation" }];
            if t.contract.may_block {
                traits.push("may block until its timeout");
            }
            traits.push(if t.contract.retry_safe { "safe to retry" } else { "not safe to retry" });
            format!(
                "- {}: {} ({})\n  arguments: {}",
                t.name,
                t.description,
                traits.join(", "),
                t.contract.input_schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_progress(steps: &[PlanStep], results: &[StepResult]) -> String {
    if results.is_empty() {
        return "(nothing executed yet)".into();
    }
    let goals: HashMap<StepId, &PlanStep> = steps.iter().map(|s| (s.id, s)).collect();
    results
        .iter()
        .map(|r| {
            let (goal, tool) = goals
                .get(&r.step_id)
                .map(|s| (s.goal.as_str(), s.tool.as_deref().unwrap_or("none")))
                .unwrap_or(("?", "?"));
            let detail = match r.status {
                StepStatus::Success => r.payload.summary.clone(),
                _ => {
                    let reason = r.reason.as_ref().map(|x| x.as_str()).unwrap_or("unknown");
                    format!("{reason}: {}", r.payload.error.as_deref().unwrap_or(""))
                }
            };
            format!("- id {} [{}] {goal} (tool: {tool}) -> {detail}", r.step_id, r.status.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    task_analysis: String,
    #[serde(default)]
    execution_plan: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    step: Option<u32>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: serde_json::Value,
    #[serde(default)]
    uncertainty: Option<f32>,
    #[serde(default)]
    requires_confirmation: Option<bool>,
    #[serde(default)]
    uncertainty_reason: Option<String>,
    #[serde(default)]
    expected_result: Option<String>,
    #[serde(default)]
    depends_on: Vec<u32>,
    #[serde(default)]
    uses_results: Vec<u32>,
    #[serde(default)]
    supersedes: Option<u32>,
}

/// Parse the planner's reply into a plan whose ids start at `next_id`.
pub fn parse_plan(text: &str, revision: u32, next_id: StepId) -> Result<ExecutionPlan, PlanError> {
    let json = extract_json(text).ok_or_else(|| PlanError::Parse("no JSON object in reply".into()))?;
    let raw: RawPlan = serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))?;
    if raw.execution_plan.is_empty() {
        return Err(PlanError::Empty);
    }

    // Local step numbers -> request-wide ids
    let mut local = HashMap::new();
    for (pos, step) in raw.execution_plan.iter().enumerate() {
        let number = step.step.unwrap_or(pos as u32 + 1);
        if local.insert(number, StepId(next_id.0 + pos as u32)).is_some() {
            return Err(PlanError::Invalid(format!("duplicate step number {number}")));
        }
    }

    let mut steps = Vec::with_capacity(raw.execution_plan.len());
    for (pos, raw_step) in raw.execution_plan.into_iter().enumerate() {
        let id = StepId(next_id.0 + pos as u32);
        let uncertainty = match (raw_step.uncertainty, raw_step.requires_confirmation) {
            (Some(u), _) => u,
            (None, Some(true)) => 1.0,
            (None, Some(false)) => 0.0,
            (None, None) => {
                return Err(PlanError::Parse(format!(
                    "step '{}' has no uncertainty score",
                    raw_step.description
                )));
            }
        };
        if raw_step.description.trim().is_empty() {
            return Err(PlanError::Invalid(format!("step {id} has no description")));
        }

        let mut depends_on = Vec::new();
        for number in &raw_step.depends_on {
            let dep = local
                .get(number)
                .copied()
                .filter(|dep| *dep < id)
                .ok_or_else(|| PlanError::Invalid(format!("step {id} depends on unknown step {number}")))?;
            depends_on.push(dep);
        }
        depends_on.extend(raw_step.uses_results.iter().map(|n| StepId(*n)));

        let mut step = PlanStep::new(id, raw_step.description, normalize_tool(raw_step.tool))
            .with_uncertainty(uncertainty)
            .with_arguments(raw_step.arguments)
            .depending_on(depends_on);
        step.uncertainty_reason = raw_step.uncertainty_reason.filter(|r| !r.trim().is_empty());
        step.expected_result = raw_step.expected_result.filter(|r| !r.trim().is_empty());
        step.supersedes = raw_step.supersedes.map(StepId);
        steps.push(step);
    }

    Ok(ExecutionPlan::new(revision, raw.task_analysis, steps))
}

/// `"none"`, `"null"` and blank names mark a tool-free step.
fn normalize_tool(tool: Option<String>) -> Option<String> {
    tool.map(|t| t.trim().to_string()).filter(|t| {
        !t.is_empty() && !t.eq_ignore_ascii_case("none") && !t.eq_ignore_ascii_case("null")
    })
}

/// The JSON object in a reply: a fenced block if present, else the
/// outermost braces.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|n| n + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Reject plans the controller cannot run: no steps, reused or duplicate
/// ids, or dependencies on anything but earlier steps and successful results.
pub fn check_plan(plan: &ExecutionPlan, results: &[StepResult], next_id: StepId) -> Result<(), PlanError> {
    if plan.is_empty() {
        return Err(PlanError::Empty);
    }
    let succeeded: HashSet<StepId> = results.iter().filter(|r| r.is_success()).map(|r| r.step_id).collect();
    let unresolved: HashSet<StepId> = results
        .iter()
        .filter(|r| matches!(r.status, StepStatus::Failure | StepStatus::Skipped))
        .map(|r| r.step_id)
        .collect();
    let mut seen = HashSet::new();
    for step in &plan.steps {
        if step.id < next_id {
            return Err(PlanError::Invalid(format!("step id {} is already in use", step.id)));
        }
        for dep in &step.depends_on {
            if !seen.contains(dep) && !succeeded.contains(dep) {
                return Err(PlanError::Invalid(format!(
                    "step {} depends on {dep}, which is neither earlier in the plan nor a successful result",
                    step.id
                )));
            }
        }
        if let Some(prev) = step.supersedes {
            if succeeded.contains(&prev) {
                return Err(PlanError::Invalid(format!(
                    "step {} redoes step {prev}, which already succeeded",
                    step.id
                )));
            }
            if !unresolved.contains(&prev) {
                return Err(PlanError::Invalid(format!(
                    "step {} supersedes {prev}, which is not a failed or skipped step",
                    step.id
                )));
            }
        }
        if !seen.insert(step.id) {
            return Err(PlanError::Invalid(format!("duplicate step id {}", step.id)));
        }
    }
    Ok(())
}
