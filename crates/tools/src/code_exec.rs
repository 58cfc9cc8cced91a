//! Code execution tool — runs Python through a local interpreter.
//!
//! The code comes from the `code` argument, or is generated from the step
//! goal through the reasoning backend when generation is enabled. The
//! interpreter reads the program from stdin and is killed if the invocation
//! is dropped (timeout or cancellation).

use async_trait::async_trait;
use planwright_core::error::ToolError;
use planwright_core::provider::{Provider, ProviderRequest};
use planwright_core::message::Message;
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const NAME: &str = "code_execution";

const GENERATION_PROMPT: &str = "You are a Python code generator. Write a complete, runnable \
Python 3 program for the task below. Print the final answer to stdout. Handle likely errors. \
Use only the standard library unless the task requires otherwise. Reply with code only, no \
explanations.";

/// Produces Python source from a natural-language task.
pub struct CodeGenerator {
    provider: Arc<dyn Provider>,
    model: String,
}

impl CodeGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    async fn generate(&self, task: &str, context: &str) -> Result<String, ToolError> {
        let mut request = ProviderRequest::prompt(&self.model, GENERATION_PROMPT, 0.0);
        request.messages.push(Message::user(format!(
            "Task: {task}\n\nContext:\n{}",
            if context.is_empty() { "(none)" } else { context }
        )));

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| failed(format!("code generation failed: {e}")))?;
        Ok(strip_fences(&response.message.content))
    }
}

pub struct CodeExecutionTool {
    interpreter: String,
    generator: Option<CodeGenerator>,
}

impl CodeExecutionTool {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    async fn resolve_code(&self, input: &ToolInput) -> Result<String, ToolError> {
        if let Some(code) = input.str_arg("code") {
            return Ok(strip_fences(code));
        }

        let generator = self.generator.as_ref().ok_or_else(|| {
            ToolError::InvalidArguments("Missing 'code' argument and code generation is disabled".into())
        })?;

        let task = input.str_arg("task_description").unwrap_or(input.goal.as_str());
        let mut context: Vec<String> = input
            .dependencies
            .iter()
            .map(|d| format!("step {}: {}", d.step_id, d.output))
            .collect();
        if let Some(extra) = input.str_arg("context") {
            context.push(extra.to_string());
        }
        if let Some(feedback) = &input.feedback {
            context.push(format!("user feedback: {feedback}"));
        }
        generator.generate(task, &context.join("\n")).await
    }

    async fn run(&self, code: &str) -> Result<std::process::Output, ToolError> {
        let mut child = Command::new(&self.interpreter)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::NotConfigured {
                tool_name: NAME.into(),
                reason: format!("cannot start '{}': {e}", self.interpreter),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| failed(e.to_string()))?;
        }

        child.wait_with_output().await.map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Run Python code and return what it prints. Pass 'code', or describe the task and the code is generated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to execute"
                },
                "task_description": {
                    "type": "string",
                    "description": "What the code should do, when 'code' is omitted"
                },
                "context": {
                    "type": "string",
                    "description": "Extra background for code generation"
                }
            }
        })
    }

    fn contract(&self) -> ToolContract {
        ToolContract::new(self.parameters_schema())
            .may_block(true)
            .timeout_secs(60)
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let code = self.resolve_code(&input).await?;
        debug!(interpreter = %self.interpreter, bytes = code.len(), "Executing code");

        let output = self.run(&code).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code_num = output.status.code().unwrap_or(-1);
            warn!(exit_code = code_num, "Code execution failed");
            return Err(failed(format!("exit code {code_num}: {stderr}")));
        }

        Ok(ToolOutput::text(stdout).with_data(serde_json::json!({
            "code": code,
            "stderr": stderr,
        })))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: NAME.into(),
        reason,
    }
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_fences(code: &str) -> String {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag on the opening line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwright_core::error::ProviderError;
    use planwright_core::provider::ProviderResponse;

    struct FixedProvider(&'static str);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(self.0),
                usage: None,
                model: "fixed".into(),
            })
        }
    }

    #[test]
    fn strips_python_fence() {
        assert_eq!(strip_fences("```python\nprint(2 + 2)\n```"), "print(2 + 2)");
        assert_eq!(strip_fences("```\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_fences("print('plain')"), "print('plain')");
    }

    #[test]
    fn contract_requires_confirmation() {
        let contract = CodeExecutionTool::new("python3").contract();
        assert!(!contract.auto_run);
        assert!(!contract.retry_safe);
        assert!(contract.may_block);
    }

    #[tokio::test]
    async fn missing_code_without_generator_is_invalid() {
        let tool = CodeExecutionTool::new("python3");
        let err = tool
            .invoke(ToolInput::new("compute 2+2", serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn generated_code_is_unfenced() {
        let tool = CodeExecutionTool::new("python3").with_generator(CodeGenerator::new(
            Arc::new(FixedProvider("```python\nprint(4)\n```")),
            "gpt-4o-mini",
        ));
        let code = tool
            .resolve_code(&ToolInput::new("compute 2+2", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(code, "print(4)");
    }

    #[tokio::test]
    async fn missing_interpreter_is_not_configured() {
        let tool = CodeExecutionTool::new("definitely-not-an-interpreter");
        let err = tool
            .invoke(ToolInput::new("x", serde_json::json!({"code": "print(1)"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured { .. }));
    }
}
