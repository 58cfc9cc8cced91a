//! Loop controller — the plan/execute state machine for one request.
//!
//! ```text
//! Analyzing -> Planning -> Executing(i) -> [Gating(i)] -> Collecting(i) -> Executing(i+1) ... -> Synthesizing -> Done
//!                  ^                                            |
//!                  +---------------- Replanning <---------------+
//! ```
//!
//! Each state is a value of [`LoopState`]; `run` steps through them in a
//! loop, so a re-plan is a transition back to `Planning` carrying the
//! recorded results, not a nested call. Every transition that the caller
//! can observe emits exactly one event before the next one starts.
//! Steps run one at a time, so events are totally ordered per request.

use planwright_config::{LoopConfig, ReplanPolicy};
use planwright_core::{
    AgentRequest, ConfirmationProposal, Conversation, DomainEvent, EventBus, ExecutionPlan,
    McpServerConfig, Message, PlanStep, ResultReason, StepId, StepResult, ToolDiscovery,
    ToolRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LoopError;
use crate::executor::{PlanImpact, StepContext, StepExecutor, StepOutcome};
use crate::gate::{ConfirmationHub, GateDecision, ToolChange};
use crate::planner::{Planner, PlanningInput, check_plan};
use crate::stream_event::{EventSink, LoopEvent};
use crate::synthesizer::{FinalResponse, ResponseSynthesizer, SynthesisInput};

/// Re-entry into `Executing` after the gate let a step through.
#[derive(Debug, Clone)]
struct Resume {
    feedback: Option<String>,
    /// Emit `step_started` again (a modified step is a new step).
    announce: bool,
}

#[derive(Debug)]
enum LoopState {
    Analyzing,
    Planning,
    Executing { index: usize, resume: Option<Resume> },
    Gating { index: usize },
    Collecting { index: usize, outcome: StepOutcome },
    Replanning { reason: String },
    Synthesizing,
    Done(FinalResponse),
    Aborted(LoopError),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::Analyzing => "analyzing",
            LoopState::Planning => "planning",
            LoopState::Executing { .. } => "executing",
            LoopState::Gating { .. } => "gating",
            LoopState::Collecting { .. } => "collecting",
            LoopState::Replanning { .. } => "replanning",
            LoopState::Synthesizing => "synthesizing",
            LoopState::Done(_) => "done",
            LoopState::Aborted(_) => "aborted",
        }
    }
}

/// Everything one request needs to start.
pub struct RunRequest {
    pub request_id: String,
    pub request: AgentRequest,
    pub sink: EventSink,
    pub hub: Arc<ConfirmationHub>,
    pub cancel: CancellationToken,
}

/// How a request ended, with the state it accumulated.
#[derive(Debug)]
pub struct RunSummary {
    pub request_id: String,
    pub outcome: Result<FinalResponse, LoopError>,
    /// The conversation including this turn's user message and, on
    /// success, the answer.
    pub conversation: Conversation,
    pub results: Vec<StepResult>,
    pub replans: u32,
}

/// Mutable state of one request, owned by the running loop.
struct RequestRun {
    id: String,
    message: String,
    mcp_configs: Vec<McpServerConfig>,
    conversation: Conversation,
    plan: ExecutionPlan,
    /// Every step created, across all revisions.
    steps: Vec<PlanStep>,
    results: Vec<StepResult>,
    /// Original step id -> the step that replaced it through `modify`.
    replacements: HashMap<StepId, StepId>,
    next_id: u32,
    replans: u32,
    replan_reason: Option<String>,
    started: Instant,
    sink: EventSink,
    hub: Arc<ConfirmationHub>,
    cancel: CancellationToken,
}

impl RequestRun {
    fn new(req: RunRequest) -> Self {
        Self {
            id: req.request_id,
            message: req.request.message,
            mcp_configs: req.request.mcp_configs,
            conversation: Conversation::from_history(req.request.conversation_history),
            plan: ExecutionPlan::default(),
            steps: Vec::new(),
            results: Vec::new(),
            replacements: HashMap::new(),
            next_id: 0,
            replans: 0,
            replan_reason: None,
            started: Instant::now(),
            sink: req.sink,
            hub: req.hub,
            cancel: req.cancel,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn completed_steps(&self) -> Vec<StepId> {
        self.results.iter().filter(|r| r.is_success()).map(|r| r.step_id).collect()
    }

    /// Follow `modify` replacements to the step that now stands for `id`.
    fn effective(&self, mut id: StepId) -> StepId {
        while let Some(next) = self.replacements.get(&id) {
            id = *next;
        }
        id
    }

    /// The step at `index` with dependencies pointed at replacements.
    fn resolved_step(&self, index: usize) -> Option<PlanStep> {
        let mut step = self.plan.steps.get(index)?.clone();
        step.depends_on = step.depends_on.iter().map(|d| self.effective(*d)).collect();
        Some(step)
    }

    fn has_dependents(&self, index: usize) -> bool {
        let Some(id) = self.plan.steps.get(index).map(|s| s.id) else {
            return false;
        };
        self.plan
            .steps
            .iter()
            .skip(index + 1)
            .any(|s| s.depends_on.iter().any(|d| self.effective(*d) == id))
    }

    fn allocate_id(&mut self) -> StepId {
        let id = StepId(self.next_id);
        self.next_id += 1;
        id
    }
}

pub struct LoopController {
    planner: Arc<dyn Planner>,
    executor: StepExecutor,
    synthesizer: ResponseSynthesizer,
    registry: Arc<ToolRegistry>,
    discovery: Option<Arc<dyn ToolDiscovery>>,
    events: Option<Arc<EventBus>>,
    config: LoopConfig,
}

impl LoopController {
    pub fn new(
        planner: Arc<dyn Planner>,
        synthesizer: ResponseSynthesizer,
        registry: Arc<ToolRegistry>,
        config: LoopConfig,
    ) -> Self {
        Self {
            planner,
            executor: StepExecutor::new(Arc::clone(&registry), config.clone()),
            synthesizer,
            registry,
            discovery: None,
            events: None,
            config,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ToolDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive one request to `Done` or `Aborted`. The last event emitted is
    /// always `final_response` or `error`.
    pub async fn run(&self, request: RunRequest) -> RunSummary {
        let mut run = RequestRun::new(request);
        info!(request_id = %run.id, "Request started");

        let mut state = LoopState::Analyzing;
        let outcome = loop {
            debug!(request_id = %run.id, state = state.name(), "Loop transition");
            state = match state {
                LoopState::Done(response) => {
                    self.finish(&mut run, &response).await;
                    break Ok(response);
                }
                LoopState::Aborted(err) => {
                    self.abort(&run, &err).await;
                    break Err(err);
                }
                _ if run.cancel.is_cancelled() => LoopState::Aborted(LoopError::Cancelled),
                state => self.advance(state, &mut run).await,
            };
        };

        RunSummary {
            request_id: run.id,
            outcome,
            conversation: run.conversation,
            results: run.results,
            replans: run.replans,
        }
    }

    async fn advance(&self, state: LoopState, run: &mut RequestRun) -> LoopState {
        match state {
            LoopState::Analyzing => self.analyze(run).await,
            LoopState::Planning => self.plan(run).await,
            LoopState::Executing { index, resume } => self.execute(run, index, resume).await,
            LoopState::Gating { index } => self.gate(run, index).await,
            LoopState::Collecting { index, outcome } => self.collect(run, index, outcome).await,
            LoopState::Replanning { reason } => self.replan(run, reason).await,
            LoopState::Synthesizing => self.synthesize(run).await,
            terminal @ (LoopState::Done(_) | LoopState::Aborted(_)) => terminal,
        }
    }

    async fn analyze(&self, run: &mut RequestRun) -> LoopState {
        run.conversation.push(Message::user(run.message.clone()));

        let Some(discovery) = &self.discovery else {
            return LoopState::Planning;
        };
        let servers: Vec<McpServerConfig> = run
            .mcp_configs
            .iter()
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(request_id = %run.id, error = %e, "Skipping invalid MCP server config");
                    false
                }
            })
            .cloned()
            .collect();
        if servers.is_empty() {
            return LoopState::Planning;
        }

        let discovered = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return LoopState::Aborted(LoopError::Cancelled),
            found = discovery.discover(&servers, &self.registry) => found,
        };
        info!(
            request_id = %run.id,
            servers = servers.len(),
            tools = discovered.len(),
            "Tool discovery finished"
        );
        for descriptor in discovered {
            self.publish(DomainEvent::ToolRegistered {
                tool_name: descriptor.name,
                source: match descriptor.source {
                    planwright_core::ToolSource::Builtin => "builtin".into(),
                    planwright_core::ToolSource::Mcp { server } => format!("mcp:{server}"),
                },
                timestamp: chrono::Utc::now(),
            });
        }
        LoopState::Planning
    }

    async fn plan(&self, run: &mut RequestRun) -> LoopState {
        let tools = self.registry.list();
        let revision = run.plan.revision + 1;
        let next_id = StepId(run.next_id);
        let input = PlanningInput {
            request: &run.message,
            conversation: &run.conversation,
            tools: &tools,
            results: &run.results,
            known_steps: &run.steps,
            replan_reason: run.replan_reason.as_deref(),
            revision,
            next_id,
        };

        let planned = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return LoopState::Aborted(LoopError::Cancelled),
            planned = self.planner.plan(input) => planned,
        };
        let mut plan = match planned.and_then(|p| check_plan(&p, &run.results, next_id).map(|()| p)) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(request_id = %run.id, revision, error = %e, "Planning failed");
                return LoopState::Aborted(e.into());
            }
        };
        plan.revision = revision;

        if let Some(max) = plan.steps.iter().map(|s| s.id.0).max() {
            run.next_id = max + 1;
        }
        run.steps.extend(plan.steps.iter().cloned());
        run.plan = plan;
        info!(
            request_id = %run.id,
            revision,
            steps = run.plan.len(),
            "Plan created"
        );
        self.announce_plan(run).await;
        LoopState::Executing { index: 0, resume: None }
    }

    async fn announce_plan(&self, run: &RequestRun) {
        self.emit(
            run,
            LoopEvent::PlanCreated {
                revision: run.plan.revision,
                analysis: run.plan.analysis.clone(),
                steps: run.plan.steps.clone(),
            },
        )
        .await;
        self.publish(DomainEvent::PlanCreated {
            request_id: run.id.clone(),
            revision: run.plan.revision,
            step_count: run.plan.len(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn execute(&self, run: &mut RequestRun, index: usize, resume: Option<Resume>) -> LoopState {
        let Some(step) = run.resolved_step(index) else {
            return LoopState::Synthesizing;
        };

        if resume.as_ref().is_none_or(|r| r.announce) {
            self.emit(
                run,
                LoopEvent::StepStarted {
                    step_id: step.id,
                    goal: step.goal.clone(),
                    tool: step.tool.clone(),
                },
            )
            .await;
        }

        let ctx = StepContext {
            results: &run.results,
            has_dependents: run.has_dependents(index),
            force_auto_run: resume.is_some(),
            feedback: resume.as_ref().and_then(|r| r.feedback.as_deref()),
            cancel: &run.cancel,
        };
        let outcome = self.executor.execute(&step, ctx).await;

        if outcome.is_cancelled() {
            return LoopState::Aborted(LoopError::Cancelled);
        }
        match outcome.impact {
            PlanImpact::AwaitingConfirmation => LoopState::Gating { index },
            _ => LoopState::Collecting { index, outcome },
        }
    }

    async fn gate(&self, run: &mut RequestRun, index: usize) -> LoopState {
        let Some(step) = run.plan.steps.get(index).cloned() else {
            return LoopState::Aborted(LoopError::Internal(format!("no step at index {index}")));
        };

        // Register first so a response to the event cannot race ahead of it
        let pending = run.hub.register(step.id).await;
        self.emit(
            run,
            LoopEvent::ConfirmationRequired {
                step_id: step.id,
                proposal: ConfirmationProposal {
                    goal: step.goal.clone(),
                    tool: step.tool.clone(),
                    arguments: step.arguments.clone(),
                    uncertainty: step.uncertainty,
                    uncertainty_reason: step.uncertainty_reason.clone(),
                    expected_result: step.expected_result.clone(),
                    position: index + 1,
                    total_steps: run.plan.len(),
                },
            },
        )
        .await;

        let decision = pending.decision(&run.hub, &run.cancel).await;
        info!(request_id = %run.id, step_id = %step.id, decision = ?decision, "Confirmation resolved");

        match decision {
            GateDecision::Cancelled => {
                // Recorded without an event: nothing follows a cancellation
                run.results.push(StepResult::skipped(
                    step.id,
                    ResultReason::ConfirmationRejected,
                    "request cancelled",
                ));
                LoopState::Aborted(LoopError::Cancelled)
            }
            GateDecision::Approved { feedback } => LoopState::Executing {
                index,
                resume: Some(Resume {
                    feedback,
                    announce: false,
                }),
            },
            GateDecision::Rejected { feedback } => {
                let detail = match feedback {
                    Some(f) => format!("rejected by user: {f}"),
                    None => "rejected by user".to_string(),
                };
                LoopState::Collecting {
                    index,
                    outcome: StepOutcome {
                        result: StepResult::skipped(step.id, ResultReason::ConfirmationRejected, detail),
                        impact: PlanImpact::Invalidated {
                            blocks_dependents: run.has_dependents(index),
                        },
                    },
                }
            }
            GateDecision::Modified { goal, tool, feedback } => {
                self.replace_step(run, index, &step, goal, tool).await;
                LoopState::Executing {
                    index,
                    resume: Some(Resume {
                        feedback,
                        announce: true,
                    }),
                }
            }
        }
    }

    /// Put a caller-modified copy of `original` in its place as a new
    /// step and revision; the original is recorded as superseded.
    async fn replace_step(
        &self,
        run: &mut RequestRun,
        index: usize,
        original: &PlanStep,
        goal: Option<String>,
        tool: ToolChange,
    ) {
        let id = run.allocate_id();
        let tool = match tool {
            ToolChange::Keep => original.tool.clone(),
            ToolChange::Clear => None,
            ToolChange::Replace(name) => Some(name),
        };
        let arguments = if tool == original.tool {
            original.arguments.clone()
        } else {
            serde_json::Value::Null
        };

        let mut replacement = PlanStep::new(id, goal.unwrap_or_else(|| original.goal.clone()), tool)
            .with_uncertainty(original.uncertainty)
            .with_arguments(arguments)
            .depending_on(original.depends_on.clone());
        replacement.expected_result = original.expected_result.clone();
        replacement.supersedes = Some(original.id);

        self.record(
            run,
            original.tool.clone(),
            StepResult::skipped(original.id, ResultReason::Superseded { by: id }, "modified by user"),
        )
        .await;

        run.replacements.insert(original.id, id);
        run.steps.push(replacement.clone());
        run.plan = run.plan.with_replacement(index, replacement);
        info!(
            request_id = %run.id,
            original = %original.id,
            replacement = %id,
            revision = run.plan.revision,
            "Step modified"
        );
        self.announce_plan(run).await;
    }

    async fn collect(&self, run: &mut RequestRun, index: usize, outcome: StepOutcome) -> LoopState {
        let step = run.plan.steps.get(index).cloned();
        let tool = step.as_ref().and_then(|s| s.tool.clone());
        let result = outcome.result;
        if !result.status.is_terminal() {
            return LoopState::Aborted(LoopError::Internal(format!(
                "step {} reached collection as {}",
                result.step_id,
                result.status.as_str()
            )));
        }
        let reason = replan_reason(step.as_ref(), &result);
        let rejected = result.reason == Some(ResultReason::ConfirmationRejected);
        self.record(run, tool, result).await;

        match outcome.impact {
            PlanImpact::Proceed => LoopState::Executing {
                index: index + 1,
                resume: None,
            },
            PlanImpact::Invalidated { blocks_dependents } => {
                let replan = rejected
                    || blocks_dependents
                    || self.config.replan_policy == ReplanPolicy::AnyFailure;
                if replan {
                    LoopState::Replanning { reason }
                } else {
                    debug!(request_id = %run.id, index, "Failure has no dependents, continuing");
                    LoopState::Executing {
                        index: index + 1,
                        resume: None,
                    }
                }
            }
            PlanImpact::AwaitingConfirmation => {
                LoopState::Aborted(LoopError::Internal("unresolved confirmation reached collection".into()))
            }
        }
    }

    /// Append a terminal result and announce it.
    async fn record(&self, run: &mut RequestRun, tool: Option<String>, result: StepResult) {
        self.publish(DomainEvent::StepExecuted {
            request_id: run.id.clone(),
            step_id: result.step_id,
            tool,
            status: result.status,
            duration_ms: result.duration_ms,
            timestamp: chrono::Utc::now(),
        });
        let event = LoopEvent::StepResult {
            step_id: result.step_id,
            status: result.status,
            reason: result.reason.clone(),
            payload: result.payload.clone(),
            duration_ms: result.duration_ms,
        };
        run.results.push(result);
        self.emit(run, event).await;
    }

    async fn replan(&self, run: &mut RequestRun, reason: String) -> LoopState {
        if run.replans >= self.config.replan_cap {
            warn!(request_id = %run.id, cap = self.config.replan_cap, "Re-plan cap reached");
            return LoopState::Aborted(LoopError::ReplanCapExceeded {
                cap: self.config.replan_cap,
                reason,
            });
        }
        run.replans += 1;
        info!(request_id = %run.id, attempt = run.replans, reason = %reason, "Re-planning");

        self.emit(
            run,
            LoopEvent::Replanning {
                reason: reason.clone(),
                attempt: run.replans,
            },
        )
        .await;
        self.publish(DomainEvent::ReplanTriggered {
            request_id: run.id.clone(),
            attempt: run.replans,
            reason: reason.clone(),
            timestamp: chrono::Utc::now(),
        });
        run.replan_reason = Some(reason);
        LoopState::Planning
    }

    async fn synthesize(&self, run: &mut RequestRun) -> LoopState {
        let input = SynthesisInput {
            request: &run.message,
            analysis: &run.plan.analysis,
            conversation: &run.conversation,
            steps: &run.steps,
            results: &run.results,
        };
        let synthesized = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return LoopState::Aborted(LoopError::Cancelled),
            synthesized = self.synthesizer.synthesize(input) => synthesized,
        };
        match synthesized {
            Ok(mut response) => {
                response.elapsed_ms = run.elapsed_ms();
                LoopState::Done(response)
            }
            Err(e) => LoopState::Aborted(e),
        }
    }

    async fn finish(&self, run: &mut RequestRun, response: &FinalResponse) {
        run.conversation.push(Message::assistant(response.text.clone()));
        self.emit(
            run,
            LoopEvent::FinalResponse {
                text: response.text.clone(),
                sources: response.sources.clone(),
                elapsed_ms: response.elapsed_ms,
            },
        )
        .await;
        self.publish(DomainEvent::RequestFinished {
            request_id: run.id.clone(),
            success: true,
            elapsed_ms: response.elapsed_ms,
            timestamp: chrono::Utc::now(),
        });
        info!(
            request_id = %run.id,
            elapsed_ms = response.elapsed_ms,
            replans = run.replans,
            "Request finished"
        );
    }

    async fn abort(&self, run: &RequestRun, err: &LoopError) {
        match err {
            LoopError::Cancelled => info!(request_id = %run.id, "Request cancelled"),
            _ => warn!(request_id = %run.id, kind = err.kind(), error = %err, "Request aborted"),
        }
        self.emit(
            run,
            LoopEvent::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
                completed_steps: run.completed_steps(),
            },
        )
        .await;
        self.publish(DomainEvent::RequestFinished {
            request_id: run.id.clone(),
            success: false,
            elapsed_ms: run.elapsed_ms(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// A consumer that went away cancels the request. A consumer that stops
    /// reading does not hold up a cancellation.
    async fn emit(&self, run: &RequestRun, event: LoopEvent) {
        let kind = event.event_type();
        let delivered = tokio::select! {
            biased;
            delivered = run.sink.emit(event) => delivered,
            _ = run.cancel.cancelled() => {
                debug!(request_id = %run.id, event = kind, "Event dropped, request cancelled");
                return;
            }
        };
        if !delivered && !run.cancel.is_cancelled() {
            debug!(request_id = %run.id, event = kind, "Event consumer gone, cancelling");
            run.cancel.cancel();
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn replan_reason(step: Option<&PlanStep>, result: &StepResult) -> String {
    let goal = step.map(|s| s.goal.as_str()).unwrap_or("?");
    match &result.reason {
        Some(ResultReason::ConfirmationRejected) => {
            format!("step {} ({goal}) was rejected", result.step_id)
        }
        reason => format!(
            "step {} ({goal}) failed [{}]: {}",
            result.step_id,
            reason.as_ref().map(|r| r.as_str()).unwrap_or("unknown"),
            result.payload.error.as_deref().unwrap_or("")
        ),
    }
}
