//! End-to-end scenarios for the Planwright plan-execute loop.
//!
//! Each test drives a full request through the orchestrator with a scripted
//! reasoning backend and mock tools, and checks the event stream a caller
//! would see.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use planwright_agent::{LoopEvent, Orchestrator, RunHandle, controller_from_config};
use planwright_config::AppConfig;
use planwright_core::error::{ProviderError, ToolError};
use planwright_core::message::Message;
use planwright_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput, ToolRegistry};
use planwright_core::{AgentRequest, ConfirmationResponse, ResultReason, StepId, StepStatus};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted replies in sequence; panics when exhausted.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<String>>,
    call_count: std::sync::Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        if *count >= responses.len() {
            panic!(
                "ScriptedProvider exhausted: call #{}, have {}",
                *count,
                responses.len()
            );
        }
        let text = responses[*count].clone();
        *count += 1;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }
}

fn plan(steps: &[(&str, Option<&str>, f32)]) -> String {
    let steps: Vec<serde_json::Value> = steps
        .iter()
        .enumerate()
        .map(|(i, (goal, tool, uncertainty))| {
            serde_json::json!({
                "step": i + 1,
                "description": goal,
                "tool": tool.unwrap_or("none"),
                "uncertainty": uncertainty,
            })
        })
        .collect();
    serde_json::json!({ "task_analysis": "e2e", "execution_plan": steps }).to_string()
}

// ── Mock Tool ────────────────────────────────────────────────────────────

struct MockTool {
    name: String,
    outcome: Result<String, String>,
    auto_run: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    inputs: std::sync::Mutex<Vec<ToolInput>>,
}

impl MockTool {
    fn ok(name: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(output.into()),
            auto_run: true,
            delay: None,
            calls: AtomicUsize::new(0),
            inputs: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn failing(name: &str, reason: &str) -> Self {
        Self {
            outcome: Err(reason.into()),
            ..Self::ok(name, "")
        }
    }

    fn guarded(mut self) -> Self {
        self.auto_run = false;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "e2e mock tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn contract(&self) -> ToolContract {
        ToolContract::new(self.parameters_schema()).auto_run(self.auto_run)
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Ok(output) => Ok(ToolOutput::text(output.clone())),
            Err(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

fn orchestrator(provider: Arc<ScriptedProvider>, tools: Vec<Arc<MockTool>>) -> Orchestrator {
    let registry = Arc::new(ToolRegistry::new());
    for tool in tools {
        registry.register(tool);
    }
    let controller = controller_from_config(&AppConfig::default(), provider.clone(), registry);
    Orchestrator::new(controller, provider)
}

fn kinds(events: &[LoopEvent]) -> Vec<&'static str> {
    events.iter().map(LoopEvent::event_type).collect()
}

/// Collect events, answering every confirmation with `answer`.
async fn drive(
    handle: &mut RunHandle,
    answer: impl Fn(StepId) -> ConfirmationResponse,
) -> Vec<LoopEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        if let LoopEvent::ConfirmationRequired { step_id, .. } = &event {
            handle.confirm(answer(*step_id)).await.unwrap();
        }
        events.push(event);
    }
    events
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_single_code_step_answers() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan(&[("compute 2+2", Some("code_execution"), 0.1)]),
        "2 + 2 = 4".into(),
    ]));
    let code = Arc::new(MockTool::ok("code_execution", "4"));
    let orch = orchestrator(provider.clone(), vec![code.clone()]);

    let (events, summary) = orch.start(AgentRequest::new("What is 2 + 2?")).collect().await;

    assert_eq!(
        kinds(&events),
        vec!["plan_created", "step_started", "step_result", "final_response"]
    );
    match events.last().unwrap() {
        LoopEvent::FinalResponse { text, sources, .. } => {
            assert!(text.contains('4'));
            assert_eq!(sources, &vec![StepId(0)]);
        }
        other => panic!("expected final_response, got {other:?}"),
    }
    assert_eq!(code.calls(), 1);
    assert_eq!(provider.calls(), 2);
    assert!(summary.outcome.is_ok());
    assert_eq!(summary.replans, 0);
}

#[tokio::test]
async fn e2e_missing_tool_replans_to_reasoning_step() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan(&[("look it up", Some("encyclopedia"), 0.2)]),
        plan(&[("answer from general knowledge", None, 0.3)]),
        "Paris is the capital of France.".into(),
    ]));
    let orch = orchestrator(provider, vec![]);

    let (events, summary) = orch
        .start(AgentRequest::new("What is the capital of France?"))
        .collect()
        .await;

    assert_eq!(
        kinds(&events),
        vec![
            "plan_created",
            "step_started",
            "step_result",
            "replanning",
            "plan_created",
            "step_started",
            "step_result",
            "final_response",
        ]
    );
    match &events[2] {
        LoopEvent::StepResult { status, reason, .. } => {
            assert_eq!(*status, StepStatus::Failure);
            assert_eq!(reason, &Some(ResultReason::ToolNotFound));
        }
        other => panic!("expected step_result, got {other:?}"),
    }
    match &events[4] {
        LoopEvent::PlanCreated { revision, steps, .. } => {
            assert_eq!(*revision, 2);
            assert_eq!(steps[0].id, StepId(1));
        }
        other => panic!("expected plan_created, got {other:?}"),
    }
    let outcome = summary.outcome.unwrap();
    assert!(outcome.text.starts_with("Paris"));
    // The failed lookup was not superseded by its replacement
    assert!(outcome.text.contains("Not completed"));
}

#[tokio::test]
async fn e2e_rejected_step_is_skipped_and_replanned() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan(&[("delete temp files", Some("shell"), 0.9)]),
        plan(&[("explain what would be deleted", None, 0.1)]),
        "Nothing was deleted.".into(),
    ]));
    let shell = Arc::new(MockTool::ok("shell", "deleted").guarded());
    let orch = orchestrator(provider, vec![shell.clone()]);

    let mut handle = orch.start(AgentRequest::new("clean up my temp files"));
    let events = drive(&mut handle, ConfirmationResponse::reject).await;
    let summary = handle.finish().await;

    assert_eq!(
        kinds(&events),
        vec![
            "plan_created",
            "step_started",
            "confirmation_required",
            "step_result",
            "replanning",
            "plan_created",
            "step_started",
            "step_result",
            "final_response",
        ]
    );
    match &events[3] {
        LoopEvent::StepResult { step_id, status, reason, .. } => {
            assert_eq!(*step_id, StepId(0));
            assert_eq!(*status, StepStatus::Skipped);
            assert_eq!(reason, &Some(ResultReason::ConfirmationRejected));
        }
        other => panic!("expected step_result, got {other:?}"),
    }
    assert_eq!(shell.calls(), 0);
    assert!(summary.outcome.is_ok());
}

#[tokio::test]
async fn e2e_approved_step_runs_once() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan(&[("delete temp files", Some("shell"), 0.9)]),
        "Temp files deleted.".into(),
    ]));
    let shell = Arc::new(MockTool::ok("shell", "deleted 3 files").guarded());
    let orch = orchestrator(provider, vec![shell.clone()]);

    let mut handle = orch.start(AgentRequest::new("clean up my temp files"));
    let events = drive(&mut handle, ConfirmationResponse::approve).await;

    assert_eq!(
        kinds(&events),
        vec![
            "plan_created",
            "step_started",
            "confirmation_required",
            "step_result",
            "final_response",
        ]
    );
    assert_eq!(shell.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_cancel_during_slow_tool() {
    let provider = Arc::new(ScriptedProvider::new(vec![plan(&[
        ("crawl the site", Some("crawler"), 0.1),
        ("summarize", None, 0.1),
    ])]));
    let crawler = Arc::new(MockTool::ok("crawler", "pages").slow(Duration::from_secs(3600)));
    let orch = orchestrator(provider, vec![crawler]);

    let mut handle = orch.start(AgentRequest::new("summarize example.com"));
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        if matches!(event, LoopEvent::StepStarted { .. }) {
            assert!(orch.cancel(handle.request_id()));
        }
        events.push(event);
    }

    assert_eq!(kinds(&events), vec!["plan_created", "step_started", "error"]);
    match events.last().unwrap() {
        LoopEvent::Error { kind, completed_steps, .. } => {
            assert_eq!(kind, "cancelled");
            assert!(completed_steps.is_empty());
        }
        other => panic!("expected error, got {other:?}"),
    }
    let summary = handle.finish().await;
    assert_eq!(summary.outcome.unwrap_err().kind(), "cancelled");
    assert!(orch.active_requests().is_empty());
}

#[tokio::test]
async fn e2e_dependent_steps_run_in_order_with_outputs() {
    let plan = serde_json::json!({
        "task_analysis": "fetch then report",
        "execution_plan": [
            { "step": 1, "description": "fetch prices", "tool": "fetch", "uncertainty": 0.1 },
            { "step": 2, "description": "chart prices", "tool": "chart", "uncertainty": 0.1, "depends_on": [1] },
            { "step": 3, "description": "describe chart", "tool": "none", "uncertainty": 0.1, "depends_on": [2] }
        ]
    })
    .to_string();
    let provider = Arc::new(ScriptedProvider::new(vec![plan, "Prices rose.".into()]));
    let fetch = Arc::new(MockTool::ok("fetch", "1,2,3"));
    let chart = Arc::new(MockTool::ok("chart", "chart.png"));
    let orch = orchestrator(provider, vec![fetch, chart.clone()]);

    let (events, summary) = orch.start(AgentRequest::new("chart prices")).collect().await;

    let started: Vec<StepId> = events
        .iter()
        .filter_map(|e| match e {
            LoopEvent::StepStarted { step_id, .. } => Some(*step_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![StepId(0), StepId(1), StepId(2)]);

    // Each result directly follows its own start
    for (i, window) in events.windows(2).enumerate() {
        if let LoopEvent::StepStarted { step_id, .. } = &window[0] {
            match &window[1] {
                LoopEvent::StepResult { step_id: done, .. } => assert_eq!(done, step_id),
                other => panic!("event {i}: expected step_result, got {other:?}"),
            }
        }
    }

    let inputs = chart.inputs.lock().unwrap().clone();
    assert_eq!(inputs[0].dependencies.len(), 1);
    assert_eq!(inputs[0].dependencies[0].step_id, StepId(0));
    assert_eq!(inputs[0].dependencies[0].output, "1,2,3");
    assert_eq!(summary.outcome.unwrap().sources, vec![StepId(0), StepId(1), StepId(2)]);
}

#[tokio::test]
async fn e2e_replan_cap_stops_persistent_failure() {
    let failing = plan(&[("call the flaky api", Some("flaky"), 0.1)]);
    let provider = Arc::new(ScriptedProvider::new(vec![failing; 4]));
    let flaky = Arc::new(MockTool::failing("flaky", "503 service unavailable"));
    let orch = orchestrator(provider.clone(), vec![flaky.clone()]);

    let (events, summary) = orch.start(AgentRequest::new("use the flaky api")).collect().await;

    let replans = events
        .iter()
        .filter(|e| matches!(e, LoopEvent::Replanning { .. }))
        .count();
    assert_eq!(replans, 3);
    assert_eq!(flaky.calls(), 4);
    assert_eq!(provider.calls(), 4);
    match events.last().unwrap() {
        LoopEvent::Error { kind, .. } => assert_eq!(kind, "replan_cap_exceeded"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(summary.replans, 3);
}

#[tokio::test]
async fn e2e_started_steps_never_exceed_planned_steps() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        plan(&[
            ("step a", Some("a"), 0.1),
            ("step b", Some("broken"), 0.1),
            ("step c", Some("a"), 0.1),
        ]),
        plan(&[("step b again", Some("a"), 0.1)]),
        "done".into(),
    ]));
    let a = Arc::new(MockTool::ok("a", "ok"));
    let broken = Arc::new(MockTool::failing("broken", "boom"));
    let orch = orchestrator(provider, vec![a, broken]);

    let (events, _) = orch.start(AgentRequest::new("do a, b and c")).collect().await;

    let planned: usize = events
        .iter()
        .map(|e| match e {
            LoopEvent::PlanCreated { steps, .. } => steps.len(),
            _ => 0,
        })
        .sum();
    let started = kinds(&events).iter().filter(|k| **k == "step_started").count();
    assert!(started <= planned);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn e2e_registering_a_tool_twice_keeps_one_entry() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orch = orchestrator(
        provider,
        vec![Arc::new(MockTool::ok("search", "v1")), Arc::new(MockTool::ok("search", "v2"))],
    );
    assert_eq!(orch.registry().len(), 1);
    assert_eq!(orch.registry().list()[0].name, "search");

    let report = orch.health().await;
    assert!(report.healthy);
    assert_eq!(report.tools_registered, 1);
}
