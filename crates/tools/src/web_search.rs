//! Web search tool — queries the Tavily search API.
//!
//! Returns up to `max_results` hits formatted as numbered title/content/link
//! blocks, with the raw hits attached as structured data.

use async_trait::async_trait;
use planwright_core::error::ToolError;
use planwright_core::tool::{Tool, ToolContract, ToolInput, ToolOutput};
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAME: &str = "web_search";

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, max_results: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            max_results: max_results.max(1),
        }
    }

    pub fn from_config(config: &planwright_config::SearchToolConfig) -> Self {
        Self::new(&config.endpoint, config.tavily_api_key.clone(), config.max_results)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information. Returns titles, content snippets and links."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query (defaults to the step goal)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return (default 3)"
                }
            }
        })
    }

    fn contract(&self) -> ToolContract {
        ToolContract::new(self.parameters_schema())
            .auto_run(true)
            .retry_safe(true)
            .timeout_secs(30)
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ToolError::NotConfigured {
            tool_name: NAME.into(),
            reason: "no Tavily API key (set TAVILY_API_KEY)".into(),
        })?;

        let query = input.str_arg("query").unwrap_or(input.goal.as_str()).trim().to_string();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("Missing 'query' argument".into()));
        }
        let max_results = input
            .arguments
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(self.max_results);

        debug!(query = %query, max_results, "Searching the web");

        let body = SearchRequest {
            api_key,
            query: &query,
            max_results,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("search API returned {status}: {text}")));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        let output = format_results(&query, &parsed.results);
        let summary = format!("{} result(s) for '{query}'", parsed.results.len());
        let data = serde_json::to_value(&parsed.results).map_err(|e| failed(e.to_string()))?;

        Ok(ToolOutput::text(output).with_summary(summary).with_data(data))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: NAME.into(),
        reason,
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

/// Numbered title/content/link blocks.
pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for '{query}'.");
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "Result {}:\nTitle: {}\nContent: {}\nLink: {}",
                i + 1,
                or_placeholder(&hit.title, "(untitled)"),
                or_placeholder(&hit.content, "(no content)"),
                or_placeholder(&hit.url, "(no link)"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() { placeholder } else { value }
}
