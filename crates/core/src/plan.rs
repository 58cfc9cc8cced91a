//! Execution plan, plan step and step result types.
//!
//! A plan is created by the planner and owned by the loop controller for one
//! request. It is never edited in place: re-planning or a user modification
//! produces a new [`ExecutionPlan`] with a bumped revision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a plan step, unique within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u32);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One atomic unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: StepId,

    /// What this step should accomplish.
    pub goal: String,

    /// Tool to invoke; `None` marks a tool-free reasoning step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Planner-proposed tool arguments.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub arguments: serde_json::Value,

    /// In `[0, 1]`; above the configured threshold the step needs confirmation.
    pub uncertainty: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,

    /// Earlier steps whose results this step consumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,

    /// An earlier step this one retries or replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<StepId>,
}

impl PlanStep {
    pub fn new(id: StepId, goal: impl Into<String>, tool: Option<String>) -> Self {
        Self {
            id,
            goal: goal.into(),
            tool,
            arguments: serde_json::Value::Null,
            uncertainty: 0.0,
            uncertainty_reason: None,
            expected_result: None,
            depends_on: Vec::new(),
            supersedes: None,
        }
    }

    pub fn with_uncertainty(mut self, uncertainty: f32) -> Self {
        self.uncertainty = uncertainty.clamp(0.0, 1.0);
        self
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn depending_on(mut self, deps: Vec<StepId>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn is_tool_free(&self) -> bool {
        self.tool.is_none()
    }
}

/// An ordered sequence of steps plus the analysis that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Bumped every time the plan is replaced.
    pub revision: u32,

    /// Task analysis produced by the same planning call.
    #[serde(default)]
    pub analysis: String,

    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn new(revision: u32, analysis: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            revision,
            analysis: analysis.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A new revision with the step at `index` replaced.
    pub fn with_replacement(&self, index: usize, step: PlanStep) -> Self {
        let mut steps = self.steps.clone();
        if index < steps.len() {
            steps[index] = step;
        }
        Self {
            revision: self.revision + 1,
            analysis: self.analysis.clone(),
            steps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
    NeedsConfirmation,
}

impl StepStatus {
    /// Whether the loop may advance past a step with this status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::NeedsConfirmation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Skipped => "skipped",
            StepStatus::NeedsConfirmation => "needs_confirmation",
        }
    }
}

/// Why a step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultReason {
    ToolNotFound,
    ToolError,
    Timeout,
    ConfirmationRejected,
    Superseded { by: StepId },
    Cancelled,
}

impl ResultReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultReason::ToolNotFound => "tool_not_found",
            ResultReason::ToolError => "tool_error",
            ResultReason::Timeout => "timeout",
            ResultReason::ConfirmationRejected => "confirmation_rejected",
            ResultReason::Superseded { .. } => "superseded",
            ResultReason::Cancelled => "cancelled",
        }
    }
}

/// Tool output or error detail attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    /// Raw tool output, verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    /// Short summary used by dependent steps.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error payload, preserved verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const SUMMARY_CHARS: usize = 200;

/// First line of `text`, truncated on a char boundary.
pub fn summarize(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= SUMMARY_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(SUMMARY_CHARS).collect();
        format!("{cut}…")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ResultReason>,
    pub payload: StepPayload,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step_id: StepId, output: String, summary: Option<String>, duration_ms: u64) -> Self {
        let summary = summary.unwrap_or_else(|| summarize(&output));
        Self {
            step_id,
            status: StepStatus::Success,
            reason: None,
            payload: StepPayload {
                output,
                summary,
                data: None,
                error: None,
            },
            duration_ms,
        }
    }

    pub fn failure(step_id: StepId, reason: ResultReason, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            step_id,
            status: StepStatus::Failure,
            reason: Some(reason),
            payload: StepPayload {
                error: Some(error.into()),
                ..Default::default()
            },
            duration_ms,
        }
    }

    pub fn skipped(step_id: StepId, reason: ResultReason, detail: impl Into<String>) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            reason: Some(reason),
            payload: StepPayload {
                error: Some(detail.into()),
                ..Default::default()
            },
            duration_ms: 0,
        }
    }

    pub fn needs_confirmation(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::NeedsConfirmation,
            reason: None,
            payload: StepPayload::default(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}
