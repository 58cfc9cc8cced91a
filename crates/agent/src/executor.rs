//! Step executor — runs one plan step against the tool registry.
//!
//! Never returns an error: every outcome, including a missing tool, a
//! timeout or cancellation, is a [`StepResult`] the controller decides on.

use planwright_config::LoopConfig;
use planwright_core::{
    DependencyOutput, PlanStep, ResultReason, StepId, StepResult, StepStatus, ToolError, ToolInput,
    ToolRegistry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the rest of the plan should make of a step's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanImpact {
    /// The plan can continue.
    Proceed,
    /// The step did not succeed; `blocks_dependents` if a later step needs it.
    Invalidated { blocks_dependents: bool },
    /// The step is suspended until the gate resolves.
    AwaitingConfirmation,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub result: StepResult,
    pub impact: PlanImpact,
}

impl StepOutcome {
    fn classify(result: StepResult, has_dependents: bool) -> Self {
        let impact = match result.status {
            StepStatus::Success => PlanImpact::Proceed,
            StepStatus::NeedsConfirmation => PlanImpact::AwaitingConfirmation,
            StepStatus::Failure | StepStatus::Skipped => PlanImpact::Invalidated {
                blocks_dependents: has_dependents,
            },
        };
        Self { result, impact }
    }

    pub fn is_cancelled(&self) -> bool {
        self.result.reason == Some(ResultReason::Cancelled)
    }
}

/// Per-call inputs besides the step itself.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Results recorded so far, for dependency payloads.
    pub results: &'a [StepResult],
    /// Whether a later step in the plan depends on this one.
    pub has_dependents: bool,
    /// Skip the confirmation check for this call only.
    pub force_auto_run: bool,
    pub feedback: Option<&'a str>,
    pub cancel: &'a CancellationToken,
}

pub struct StepExecutor {
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
}

impl StepExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self { registry, config }
    }

    pub async fn execute(&self, step: &PlanStep, ctx: StepContext<'_>) -> StepOutcome {
        let result = self.run(step, &ctx).await;
        debug!(
            step_id = %step.id,
            status = result.status.as_str(),
            duration_ms = result.duration_ms,
            "Step finished"
        );
        StepOutcome::classify(result, ctx.has_dependents)
    }

    async fn run(&self, step: &PlanStep, ctx: &StepContext<'_>) -> StepResult {
        if ctx.cancel.is_cancelled() {
            return StepResult::failure(step.id, ResultReason::Cancelled, "request cancelled", 0);
        }

        let Some(tool_name) = step.tool.as_deref() else {
            return StepResult::success(step.id, String::new(), Some(format!("reasoning: {}", step.goal)), 0);
        };

        let registered = match self.registry.resolve(tool_name) {
            Ok(registered) => registered,
            Err(e) => {
                warn!(step_id = %step.id, tool = tool_name, "Tool not found");
                return StepResult::failure(step.id, ResultReason::ToolNotFound, e.to_string(), 0);
            }
        };
        let contract = &registered.descriptor.contract;

        if step.uncertainty > self.config.confirmation_threshold && !contract.auto_run && !ctx.force_auto_run {
            info!(
                step_id = %step.id,
                tool = tool_name,
                uncertainty = step.uncertainty,
                "Step needs confirmation"
            );
            return StepResult::needs_confirmation(step.id);
        }

        let input = ToolInput {
            goal: step.goal.clone(),
            arguments: step.arguments.clone(),
            dependencies: dependency_outputs(&step.depends_on, ctx.results),
            feedback: ctx.feedback.map(str::to_string),
        };
        let timeout_secs = self.config.timeout_for(tool_name, contract.timeout_secs);
        info!(step_id = %step.id, tool = tool_name, timeout_secs, "Invoking tool");

        let started = Instant::now();
        let invocation = tokio::time::timeout(Duration::from_secs(timeout_secs), registered.tool.invoke(input));
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            outcome = invocation => Some(outcome),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            None => {
                info!(step_id = %step.id, tool = tool_name, "Tool invocation cancelled");
                StepResult::failure(step.id, ResultReason::Cancelled, "request cancelled", elapsed)
            }
            Some(Err(_)) => StepResult::failure(
                step.id,
                ResultReason::Timeout,
                format!("Tool '{tool_name}' timed out after {timeout_secs}s"),
                elapsed,
            ),
            Some(Ok(Err(e @ ToolError::Timeout { .. }))) => {
                StepResult::failure(step.id, ResultReason::Timeout, e.to_string(), elapsed)
            }
            Some(Ok(Err(e))) => {
                warn!(step_id = %step.id, tool = tool_name, error = %e, "Tool failed");
                StepResult::failure(step.id, ResultReason::ToolError, error_payload(e), elapsed)
            }
            Some(Ok(Ok(output))) => {
                let mut result = StepResult::success(step.id, output.output, output.summary, elapsed);
                result.payload.data = output.data;
                result
            }
        }
    }
}

/// The tool's own error text where it has one.
fn error_payload(err: ToolError) -> String {
    match err {
        ToolError::ExecutionFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}

fn dependency_outputs(deps: &[StepId], results: &[StepResult]) -> Vec<DependencyOutput> {
    deps.iter()
        .filter_map(|id| results.iter().rev().find(|r| r.step_id == *id && r.is_success()))
        .map(|r| DependencyOutput {
            step_id: r.step_id,
            summary: r.payload.summary.clone(),
            output: r.payload.output.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockTool;

    fn executor(tools: Vec<Arc<MockTool>>) -> StepExecutor {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry.register(tool);
        }
        StepExecutor::new(registry, LoopConfig::default())
    }

    fn ctx<'a>(results: &'a [StepResult], cancel: &'a CancellationToken) -> StepContext<'a> {
        StepContext {
            results,
            has_dependents: false,
            force_auto_run: false,
            feedback: None,
            cancel,
        }
    }

    fn step(tool: Option<&str>, uncertainty: f32) -> PlanStep {
        PlanStep::new(StepId(0), "compute 2+2", tool.map(String::from)).with_uncertainty(uncertainty)
    }

    #[tokio::test]
    async fn success_carries_raw_output_and_summary() {
        let exec = executor(vec![Arc::new(MockTool::ok("code", "4\n"))]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(Some("code"), 0.1), ctx(&[], &cancel)).await;
        assert_eq!(outcome.impact, PlanImpact::Proceed);
        assert_eq!(outcome.result.payload.output, "4\n");
        assert_eq!(outcome.result.payload.summary, "4");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let exec = executor(vec![]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(Some("calculator"), 0.1), ctx(&[], &cancel)).await;
        assert_eq!(outcome.result.status, StepStatus::Failure);
        assert_eq!(outcome.result.reason, Some(ResultReason::ToolNotFound));
        assert_eq!(
            outcome.impact,
            PlanImpact::Invalidated {
                blocks_dependents: false
            }
        );
    }

    #[tokio::test]
    async fn tool_error_is_preserved_verbatim() {
        let exec = executor(vec![Arc::new(MockTool::failing("code", "NameError: x is not defined"))]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(Some("code"), 0.1), ctx(&[], &cancel)).await;
        assert_eq!(outcome.result.reason, Some(ResultReason::ToolError));
        assert_eq!(
            outcome.result.payload.error.as_deref(),
            Some("NameError: x is not defined")
        );
    }

    #[tokio::test]
    async fn uncertain_step_on_guarded_tool_needs_confirmation() {
        let tool = Arc::new(MockTool::ok("code", "4").requiring_confirmation());
        let exec = executor(vec![tool.clone()]);
        let cancel = CancellationToken::new();

        let outcome = exec.execute(&step(Some("code"), 0.9), ctx(&[], &cancel)).await;
        assert_eq!(outcome.result.status, StepStatus::NeedsConfirmation);
        assert_eq!(outcome.impact, PlanImpact::AwaitingConfirmation);
        assert_eq!(tool.calls(), 0);

        let forced = StepContext {
            force_auto_run: true,
            ..ctx(&[], &cancel)
        };
        let outcome = exec.execute(&step(Some("code"), 0.9), forced).await;
        assert!(outcome.result.is_success());
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn auto_run_tool_skips_confirmation() {
        let exec = executor(vec![Arc::new(MockTool::ok("time", "12:00"))]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(Some("time"), 0.95), ctx(&[], &cancel)).await;
        assert!(outcome.result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let tool = MockTool::ok("slow", "late").with_delay(Duration::from_secs(30)).with_timeout(2);
        let exec = executor(vec![Arc::new(tool)]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(Some("slow"), 0.0), ctx(&[], &cancel)).await;
        assert_eq!(outcome.result.reason, Some(ResultReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_invocation() {
        let tool = MockTool::ok("slow", "late").with_delay(Duration::from_secs(30));
        let exec = executor(vec![Arc::new(tool)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let outcome = exec.execute(&step(Some("slow"), 0.0), ctx(&[], &cancel)).await;
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn dependencies_and_feedback_reach_the_tool() {
        let tool = Arc::new(MockTool::ok("code", "8"));
        let exec = executor(vec![tool.clone()]);
        let cancel = CancellationToken::new();
        let results = vec![StepResult::success(StepId(0), "4".into(), None, 1)];
        let doubled = PlanStep::new(StepId(1), "double it", Some("code".into())).depending_on(vec![StepId(0)]);
        let with_feedback = StepContext {
            feedback: Some("use integers"),
            has_dependents: true,
            ..ctx(&results, &cancel)
        };
        exec.execute(&doubled, with_feedback).await;

        let input = &tool.inputs()[0];
        assert_eq!(input.dependencies.len(), 1);
        assert_eq!(input.dependencies[0].output, "4");
        assert_eq!(input.feedback.as_deref(), Some("use integers"));
    }

    #[tokio::test]
    async fn tool_free_step_succeeds_without_registry() {
        let exec = executor(vec![]);
        let cancel = CancellationToken::new();
        let outcome = exec.execute(&step(None, 0.9), ctx(&[], &cancel)).await;
        assert!(outcome.result.is_success());
    }
}
