//! Shared test helpers: a scripted reasoning backend and configurable tools.

use async_trait::async_trait;
use planwright_core::error::{ProviderError, ToolError};
use planwright_core::message::Message;
use planwright_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A provider that returns scripted replies in order and records requests.
///
/// Returns an API error once the script is exhausted.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(mut replies: Vec<Result<String, ProviderError>>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let reply = self.replies.lock().unwrap().pop().unwrap_or_else(|| {
            Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted at call #{call}"),
            })
        })?;
        Ok(make_text_response(&reply))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A planner reply with one step per `(goal, tool, uncertainty)`.
pub fn plan_json(steps: &[(&str, Option<&str>, f32)]) -> String {
    let steps: Vec<serde_json::Value> = steps
        .iter()
        .enumerate()
        .map(|(i, (goal, tool, uncertainty))| {
            serde_json::json!({
                "step": i + 1,
                "description": goal,
                "tool": tool.unwrap_or("none"),
                "uncertainty": uncertainty,
                "expected_result": "done",
            })
        })
        .collect();
    serde_json::json!({ "task_analysis": "scripted", "execution_plan": steps }).to_string()
}

/// A tool with a fixed outcome, an optional delay and a call counter.
pub struct MockTool {
    name: String,
    outcome: Result<String, String>,
    auto_run: bool,
    delay: Option<Duration>,
    timeout_secs: Option<u64>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<ToolInput>>,
}

impl MockTool {
    pub fn ok(name: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(output.into()),
            auto_run: true,
            delay: None,
            timeout_secs: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            outcome: Err(error.into()),
            ..Self::ok(name, "")
        }
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.auto_run = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<ToolInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "mock tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn contract(&self) -> ToolContract {
        let contract = ToolContract::new(self.parameters_schema()).auto_run(self.auto_run);
        match self.timeout_secs {
            Some(secs) => contract.timeout_secs(secs),
            None => contract,
        }
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
